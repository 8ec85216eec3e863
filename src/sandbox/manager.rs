use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::cache::{SandboxCache, SandboxLease};
use super::retry::{RetryPolicy, retry_with_backoff};
use super::{Sandbox, SandboxProvider};
use crate::errors::SandboxError;
use crate::models::Framework;

/// Creates, reconnects and caches sandboxes.
///
/// Remote lifetime and in-process reuse are separate: every handle this
/// manager returns has its remote idle timeout pushed out to
/// `idle_timeout`, while the cache TTL only decides how long an unused
/// handle stays in memory.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    cache: Arc<SandboxCache>,
    retry: RetryPolicy,
    idle_timeout: Duration,
}

impl SandboxManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        cache: Arc<SandboxCache>,
        retry: RetryPolicy,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
            idle_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<SandboxCache> {
        &self.cache
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    /// Create a sandbox from the framework's template.
    pub async fn acquire(&self, framework: Framework) -> Result<SandboxLease, SandboxError> {
        self.acquire_template(framework.template()).await
    }

    /// Create a sandbox from a named template, retrying with backoff.
    pub async fn acquire_template(&self, template: &str) -> Result<SandboxLease, SandboxError> {
        let provider = Arc::clone(&self.provider);
        let timeout = self.idle_timeout;
        let created = retry_with_backoff(&self.retry, "sandbox create", |attempt| {
            let provider = Arc::clone(&provider);
            async move {
                tracing::debug!(template, attempt, "creating sandbox");
                provider.create(template, timeout).await
            }
        })
        .await;

        let handle = created.map_err(|(e, attempts)| SandboxError::Provision {
            template: template.to_string(),
            attempts,
            message: e.to_string(),
        })?;

        tracing::info!(sandbox_id = handle.id(), template, "sandbox created");
        self.extend_timeout(handle.as_ref()).await;
        Ok(self.cache.insert_and_lease(handle))
    }

    /// Look a sandbox up by id: cache first, then reconnect.
    ///
    /// A failed reconnect means the remote sandbox is gone and surfaces as
    /// [`SandboxError::Unavailable`].
    pub async fn resolve(&self, sandbox_id: &str) -> Result<SandboxLease, SandboxError> {
        if let Some(lease) = self.cache.lease(sandbox_id) {
            tracing::debug!(sandbox_id, "sandbox cache hit");
            return Ok(lease);
        }

        let handle = self
            .provider
            .connect(sandbox_id)
            .await
            .map_err(|e| match e {
                SandboxError::Unavailable { .. } => e,
                other => SandboxError::Unavailable {
                    sandbox_id: sandbox_id.to_string(),
                    message: other.to_string(),
                },
            })?;

        tracing::info!(sandbox_id, "reconnected to sandbox");
        self.extend_timeout(handle.as_ref()).await;
        Ok(self.cache.insert_and_lease(handle))
    }

    /// Forget a cached handle.
    pub fn release(&self, sandbox_id: &str) {
        if self.cache.remove(sandbox_id) {
            tracing::debug!(sandbox_id, "sandbox handle released");
        }
    }

    async fn extend_timeout(&self, sandbox: &dyn Sandbox) {
        if let Err(e) = sandbox.set_timeout(self.idle_timeout).await {
            tracing::warn!(sandbox_id = sandbox.id(), error = %e, "failed to extend sandbox timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySandboxProvider;

    fn manager(provider: Arc<MemorySandboxProvider>) -> SandboxManager {
        SandboxManager::new(
            provider,
            SandboxCache::new(Duration::from_secs(300)),
            RetryPolicy::default(),
            Duration::from_secs(1800),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_retries_then_succeeds() {
        let provider = Arc::new(MemorySandboxProvider::new());
        provider.fail_next_creates(2);
        let manager = manager(Arc::clone(&provider));

        let start = tokio::time::Instant::now();
        let lease = manager.acquire(Framework::Nextjs).await.unwrap();
        assert_eq!(provider.create_calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(manager.cache().contains(lease.id()));
        assert_eq!(
            provider.sandbox(lease.id()).unwrap().timeout(),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(provider.templates(), vec!["codegen-nextjs"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_surfaces_provision_error_after_cap() {
        let provider = Arc::new(MemorySandboxProvider::new());
        provider.fail_next_creates(10);
        let manager = manager(Arc::clone(&provider));

        let err = manager.acquire(Framework::Vue).await.unwrap_err();
        assert!(matches!(err, SandboxError::Provision { attempts: 3, .. }));
        assert_eq!(provider.create_calls(), 3);
    }

    #[tokio::test]
    async fn resolve_hits_cache_without_reconnecting() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = manager(Arc::clone(&provider));
        let id = manager.acquire(Framework::React).await.unwrap().id().to_string();

        let lease = manager.resolve(&id).await.unwrap();
        assert_eq!(lease.id(), id);
        assert_eq!(provider.connect_calls(), 0);
    }

    #[tokio::test]
    async fn resolve_reconnects_on_miss() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = manager(Arc::clone(&provider));
        let id = manager.acquire(Framework::React).await.unwrap().id().to_string();
        manager.release(&id);
        assert!(!manager.cache().contains(&id));

        let lease = manager.resolve(&id).await.unwrap();
        assert_eq!(lease.id(), id);
        assert_eq!(provider.connect_calls(), 1);
        assert!(manager.cache().contains(&id));
    }

    #[tokio::test]
    async fn resolve_unknown_sandbox_is_unavailable() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = manager(provider);
        let err = manager.resolve("sbx-gone").await.unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable { .. }));
    }
}
