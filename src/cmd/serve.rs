//! HTTP API server command — `forge-codegen serve`.

use std::sync::Arc;

use anyhow::Result;
use forge_codegen::config::CodegenConfig;
use forge_codegen::pipeline::Generator;
use forge_codegen::server::{ServeOptions, start_server};

pub async fn cmd_serve(
    config: &CodegenConfig,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let generator = Generator::from_config(config)?;

    start_server(
        Arc::new(generator),
        ServeOptions {
            host: host.unwrap_or_else(|| config.server.host.clone()),
            port: port.unwrap_or(config.server.port),
            dev_mode: dev,
            sweep_interval: config.sandbox.sweep_interval(),
        },
    )
    .await
}
