//! Persistence of finished runs.
//!
//! The store is a collaborator: a failed save is logged by the caller and
//! never fails the run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Framework;
use crate::tiers::GenerationModelTier;

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub project_id: String,
    pub title: String,
    pub summary: String,
    /// Path to final content.
    pub files: std::collections::BTreeMap<String, String>,
    pub sandbox_id: String,
    pub sandbox_url: String,
    pub tier: GenerationModelTier,
    pub framework: Framework,
    pub validation_errors: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, artifact: &RunArtifact) -> Result<()>;
}

/// Writes one pretty-printed JSON file per run:
/// `<dir>/<project_id>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, artifact: &RunArtifact) -> PathBuf {
        self.dir
            .join(sanitize(&artifact.project_id))
            .join(format!("{}.json", sanitize(&artifact.run_id)))
    }

    pub async fn load(&self, project_id: &str, run_id: &str) -> Result<RunArtifact> {
        let path = self
            .dir
            .join(sanitize(project_id))
            .join(format!("{}.json", sanitize(run_id)));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse artifact: {}", path.display()))
    }
}

/// Keep ids usable as single path components.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, artifact: &RunArtifact) -> Result<()> {
        let path = self.path_for(artifact);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(artifact).context("Failed to serialize artifact")?;
        tokio::fs::write(&path, raw)
            .await
            .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "artifact saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> RunArtifact {
        RunArtifact {
            run_id: "run-1".into(),
            project_id: "../proj".into(),
            title: "Todo".into(),
            summary: "A todo app".into(),
            files: [("app/page.tsx".to_string(), "x".to_string())].into(),
            sandbox_id: "sbx".into(),
            sandbox_url: "http://localhost:3000".into(),
            tier: GenerationModelTier::Balanced,
            framework: Framework::Nextjs,
            validation_errors: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let artifact = artifact();
        store.save(&artifact).await.unwrap();

        let path = dir.path().join("___proj/run-1.json");
        assert!(path.exists());
        let loaded = store.load("../proj", "run-1").await.unwrap();
        assert_eq!(loaded, artifact);
    }

    #[tokio::test]
    async fn unwritable_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let store = FsArtifactStore::new(&blocker);
        assert!(store.save(&artifact()).await.is_err());
    }

    #[test]
    fn sanitize_ids() {
        assert_eq!(sanitize("abc-1_2"), "abc-1_2");
        assert_eq!(sanitize("a/b"), "a_b");
        assert_eq!(sanitize(""), "_");
    }
}
