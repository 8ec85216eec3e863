//! Typed error hierarchy for the code-generation agent.
//!
//! Three top-level enums cover the three failure domains:
//! - `SandboxError`: provisioning, reconnection and sandbox I/O
//! - `GatewayError`: model gateway calls
//! - `RunError`: whole-run failures that end in an `error` event

use thiserror::Error;

/// Errors from the sandbox subsystem.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox from template '{template}' after {attempts} attempts: {message}")]
    Provision {
        template: String,
        attempts: u32,
        message: String,
    },

    /// The remote sandbox expired or was destroyed; the run cannot resume.
    #[error("Sandbox {sandbox_id} is no longer available: {message}")]
    Unavailable { sandbox_id: String, message: String },

    #[error("Path rejected: {path} ({reason})")]
    PathRejected { path: String, reason: String },

    #[error("Sandbox command timed out after {secs}s")]
    CommandTimeout { secs: u64 },

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the model gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("missing API key: {0}")]
    MissingApiKey(String),
}

/// Errors that abort a run and surface as the terminal `error` event.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid run request: {0}")]
    Setup(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GatewayError),

    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    /// Stable machine-readable code carried on the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Setup(_) => "setup_failed",
            RunError::Sandbox(SandboxError::Unavailable { .. }) => "sandbox_unavailable",
            RunError::Sandbox(_) => "sandbox_provision_failed",
            RunError::Generation(_) => "generation_failed",
            RunError::Cancelled => "cancelled",
        }
    }

    /// Message shown to the end user. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            RunError::Setup(msg) => msg.clone(),
            RunError::Sandbox(SandboxError::Unavailable { .. }) => {
                "The sandbox for this project has expired. Start a new run to continue.".to_string()
            }
            RunError::Sandbox(_) => "Could not start the environment. Please try again.".to_string(),
            RunError::Generation(_) => "The model failed to generate a response.".to_string(),
            RunError::Cancelled => "Run cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_sandbox_has_distinct_code() {
        let err = RunError::from(SandboxError::Unavailable {
            sandbox_id: "sbx-1".into(),
            message: "expired".into(),
        });
        assert_eq!(err.code(), "sandbox_unavailable");
        assert!(err.user_message().contains("new run"));
    }

    #[test]
    fn provision_failure_maps_to_environment_message() {
        let err = RunError::from(SandboxError::Provision {
            template: "nextjs".into(),
            attempts: 3,
            message: "boom".into(),
        });
        assert_eq!(err.code(), "sandbox_provision_failed");
        assert!(err.user_message().contains("Could not start the environment"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn gateway_error_display() {
        let err = GatewayError::Api {
            status: 401,
            message: "invalid api key".into(),
        };
        assert!(err.to_string().contains("401"));
        let run_err = RunError::from(err);
        assert_eq!(run_err.code(), "generation_failed");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SandboxError::CommandTimeout { secs: 5 });
        assert_std_error(&GatewayError::MissingApiKey("x".into()));
        assert_std_error(&RunError::Cancelled);
    }
}
