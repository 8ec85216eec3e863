//! HTTP client for the Anthropic Messages API.
//!
//! No agent awareness. Turns a [`GenerateRequest`] into one API call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::ModelGateway;
use super::types::{ContentBlock, GenerateRequest, ModelResponse};
use crate::errors::GatewayError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Rate-limited calls are retried this many times.
const RATE_LIMIT_RETRIES: u32 = 2;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug)]
pub struct AnthropicGateway {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicGateway {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.into())
    }

    /// Point at a different endpoint (proxies, mock servers).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send(&self, request: &GenerateRequest) -> Result<ModelResponse, GatewayError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(GatewayError::RateLimited { retry_after });
        }

        if status >= 400 {
            let body = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(GatewayError::Api {
                status,
                message: body,
            });
        }

        let resp: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("failed to parse response: {e}")))?;

        tracing::debug!(stop_reason = ?resp.stop_reason, blocks = resp.content.len(), "model responded");
        Ok(ModelResponse::from_blocks(resp.content))
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn generate(&self, request: &GenerateRequest) -> Result<ModelResponse, GatewayError> {
        let mut retries = 0;
        loop {
            match self.send(request).await {
                Err(GatewayError::RateLimited { retry_after }) if retries < RATE_LIMIT_RETRIES => {
                    retries += 1;
                    let wait = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(Duration::from_secs(2 * retries as u64))
                        .min(MAX_RETRY_AFTER);
                    tracing::warn!(model = %request.model, retries, wait_secs = wait.as_secs(), "rate limited");
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}
