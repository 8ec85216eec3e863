//! Directory-backed sandbox provider.
//!
//! Each sandbox is a directory under `root/<id>/` with a metadata file
//! `root/<id>.json` that records the template and expiry. Commands run via
//! `sh -c` inside the directory; the sandbox workspace root maps onto it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::paths::validate_path;
use super::{CommandOutput, Sandbox, SandboxProvider};
use crate::errors::SandboxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxMeta {
    template: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct LocalSandboxProvider {
    root: PathBuf,
    templates_dir: Option<PathBuf>,
    workspace_root: String,
}

impl LocalSandboxProvider {
    pub fn new(root: impl Into<PathBuf>, workspace_root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            templates_dir: None,
            workspace_root: workspace_root.into(),
        }
    }

    /// Seed new sandboxes from `<templates_dir>/<template>/` when it exists.
    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn open(&self, id: &str) -> LocalSandbox {
        LocalSandbox {
            id: id.to_string(),
            dir: self.root.join(id),
            meta_path: self.meta_path(id),
            workspace_root: self.workspace_root.clone(),
        }
    }
}

fn expiry_from_now(timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

async fn read_meta(path: &Path) -> anyhow::Result<SandboxMeta> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn write_meta(path: &Path, meta: &SandboxMeta) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(meta)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(
        &self,
        template: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let id = format!("sbx-{}", uuid::Uuid::new_v4().simple());
        let sandbox = self.open(&id);
        tokio::fs::create_dir_all(&sandbox.dir).await?;

        if let Some(templates) = &self.templates_dir {
            let source = templates.join(template);
            if source.is_dir() {
                let target = sandbox.dir.clone();
                tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &target))
                    .await
                    .context("template copy task panicked")??;
            } else {
                tracing::debug!(template, "no local template directory, starting empty");
            }
        }

        let meta = SandboxMeta {
            template: template.to_string(),
            created_at: Utc::now(),
            expires_at: expiry_from_now(timeout),
        };
        write_meta(&sandbox.meta_path, &meta).await?;
        Ok(Arc::new(sandbox))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let unavailable = |message: String| SandboxError::Unavailable {
            sandbox_id: sandbox_id.to_string(),
            message,
        };
        if !is_valid_id(sandbox_id) {
            return Err(unavailable("malformed sandbox id".into()));
        }
        let sandbox = self.open(sandbox_id);
        let meta = read_meta(&sandbox.meta_path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if meta.expires_at <= Utc::now() {
            return Err(unavailable(format!("expired at {}", meta.expires_at)));
        }
        if !sandbox.dir.is_dir() {
            return Err(unavailable("workspace directory missing".into()));
        }
        Ok(Arc::new(sandbox))
    }
}

pub struct LocalSandbox {
    id: String,
    dir: PathBuf,
    meta_path: PathBuf,
    workspace_root: String,
}

impl LocalSandbox {
    fn host_path(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let validated = validate_path(path, &self.workspace_root)?;
        Ok(self.dir.join(validated.relative))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| SandboxError::CommandTimeout {
                secs: timeout.as_secs(),
            })??;

        Ok(CommandOutput {
            // Killed by a signal has no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let target = self.host_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let target = self.host_path(path)?;
        Ok(tokio::fs::read_to_string(&target).await?)
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<(), SandboxError> {
        let mut meta = read_meta(&self.meta_path).await?;
        meta.expires_at = expiry_from_now(timeout);
        write_meta(&self.meta_path, &meta).await?;
        Ok(())
    }

    fn host(&self, port: u16) -> String {
        format!("http://localhost:{}", port)
    }
}
