use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::registry::RunRegistry;
use crate::events::{ProgressEmitter, ProgressEvent};
use crate::models::RunRequest;
use crate::pipeline::Generator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub generator: Arc<Generator>,
    pub registry: Arc<RunRegistry>,
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub cancelled: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/runs/{id}/events", get(run_events))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn check_request(request: &RunRequest) -> Result<(), ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    if request.project_id.trim().is_empty() {
        return Err(ApiError::BadRequest("project_id must not be empty".into()));
    }
    Ok(())
}

/// NDJSON response that proxies must not buffer.
fn ndjson_response<S>(events: S) -> Response
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let body = Body::from_stream(events.map(|event| Ok::<_, Infallible>(event.to_ndjson())));
    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_run(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    check_request(&request)?;
    let run_id = state
        .registry
        .start(Arc::clone(&state.generator), request);
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

async fn run_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let events = state
        .registry
        .events(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;
    Ok(ndjson_response(events))
}

async fn cancel_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResult>), ApiError> {
    if !state.registry.contains(&id) {
        return Err(ApiError::NotFound(format!("Run {} not found", id)));
    }
    let cancelled = state.registry.cancel(&id);
    Ok((StatusCode::ACCEPTED, Json(CancelResult { cancelled })))
}

/// Run to completion inside one streaming response.
async fn stream_run(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Result<Response, ApiError> {
    check_request(&request)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let (emitter, rx) = ProgressEmitter::channel();
    let generator = Arc::clone(&state.generator);
    tokio::spawn(async move {
        generator
            .run(&run_id, request, emitter, CancellationToken::new())
            .await;
    });
    Ok(ndjson_response(UnboundedReceiverStream::new(rx)))
}
