//! HTTP front end: async runs with replayable NDJSON event streams, plus a
//! single-response streaming endpoint.

pub mod api;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use api::{AppState, SharedState, api_router};
pub use registry::RunRegistry;

use crate::pipeline::Generator;

/// Settings for `serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a local frontend.
    pub dev_mode: bool,
    pub sweep_interval: Duration,
}

pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve until Ctrl+C.
pub async fn start_server(generator: Arc<Generator>, options: ServeOptions) -> Result<()> {
    let sweeper = generator.sandboxes().spawn_sweeper(options.sweep_interval);
    let state = Arc::new(AppState {
        generator,
        registry: Arc::new(RunRegistry::default()),
    });
    let app = build_router(state, options.dev_mode);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = options.dev_mode, "server listening");
    eprintln!("forge-codegen listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::pipeline::GeneratorSettings;
    use crate::sandbox::{RetryPolicy, SandboxCache, SandboxManager};
    use crate::testing::{MemorySandboxProvider, ScriptedGateway};
    use crate::tiers::TierTable;

    fn state() -> SharedState {
        let manager = SandboxManager::new(
            Arc::new(MemorySandboxProvider::new()),
            SandboxCache::new(Duration::from_secs(300)),
            RetryPolicy::default(),
            Duration::from_secs(1800),
        );
        let generator = Generator::new(
            Arc::new(ScriptedGateway::default()),
            Arc::new(manager),
            Arc::new(FsArtifactStore::new(std::env::temp_dir().join("forge-codegen-test"))),
            TierTable::default(),
            GeneratorSettings::default(),
        );
        Arc::new(AppState {
            generator: Arc::new(generator),
            registry: Arc::new(RunRegistry::default()),
        })
    }

    #[tokio::test]
    async fn dev_mode_adds_cors_headers() {
        let app = build_router(state(), true);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn production_mode_has_no_cors() {
        let app = build_router(state(), false);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(!resp.headers().contains_key("access-control-allow-origin"));
    }
}
