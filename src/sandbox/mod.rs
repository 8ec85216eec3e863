//! Sandbox lifecycle: provisioning, reuse and file/command access.
//!
//! ## Module Map
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `manager` | `SandboxManager`: acquire (retry + backoff), resolve, release |
//! | `cache`   | `SandboxCache`: process-wide handle cache, leases, idle TTL |
//! | `retry`   | `RetryPolicy` and `retry_with_backoff()`                    |
//! | `paths`   | Workspace path validation for model-supplied paths          |
//! | `local`   | `LocalSandboxProvider`: directory-backed sandbox, `sh -c`   |
//!
//! The remote execution environment is reached only through the
//! [`SandboxProvider`] and [`Sandbox`] traits.

pub mod cache;
pub mod local;
pub mod manager;
pub mod paths;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::SandboxError;

pub use cache::{SandboxCache, SandboxLease};
pub use manager::SandboxManager;
pub use retry::RetryPolicy;

/// Template used when the framework-specific one cannot be provisioned.
pub const DEFAULT_TEMPLATE: &str = "codegen-base";

/// Result of a command executed inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// A live, stateful execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Extend the remote idle timeout, counted from now.
    async fn set_timeout(&self, timeout: Duration) -> Result<(), SandboxError>;

    /// Public URL of a port exposed by the sandbox.
    fn host(&self, port: u16) -> String;
}

/// Creates new sandboxes and reconnects to existing ones.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(
        &self,
        template: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn Sandbox>, SandboxError>;

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;
}
