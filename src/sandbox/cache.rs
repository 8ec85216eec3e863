//! Process-wide cache of live sandbox handles.
//!
//! Entries carry a lease count and a last-access time. Every lookup renews
//! the idle clock, and the sweeper only evicts entries that are idle past
//! the TTL *and* have no outstanding leases, so a handle held by a running
//! validation or auto-fix cycle is never dropped from under it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Sandbox;

struct CacheEntry {
    handle: Arc<dyn Sandbox>,
    last_access: Instant,
    leases: usize,
}

pub struct SandboxCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SandboxCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lease a cached handle, renewing its idle clock.
    pub fn lease(self: &Arc<Self>, sandbox_id: &str) -> Option<SandboxLease> {
        let mut entries = self.lock();
        let entry = entries.get_mut(sandbox_id)?;
        entry.last_access = Instant::now();
        entry.leases += 1;
        Some(SandboxLease {
            handle: Arc::clone(&entry.handle),
            cache: Arc::downgrade(self),
        })
    }

    /// Insert a freshly created or reconnected handle and lease it.
    ///
    /// If another caller already cached a handle for the same id, that one
    /// wins and `handle` is dropped, keeping one live handle per id.
    pub fn insert_and_lease(self: &Arc<Self>, handle: Arc<dyn Sandbox>) -> SandboxLease {
        let mut entries = self.lock();
        let entry = entries
            .entry(handle.id().to_string())
            .or_insert_with(|| CacheEntry {
                handle,
                last_access: Instant::now(),
                leases: 0,
            });
        entry.last_access = Instant::now();
        entry.leases += 1;
        SandboxLease {
            handle: Arc::clone(&entry.handle),
            cache: Arc::downgrade(self),
        }
    }

    fn return_lease(&self, sandbox_id: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(sandbox_id) {
            entry.leases = entry.leases.saturating_sub(1);
            entry.last_access = Instant::now();
        }
    }

    /// Drop an entry immediately, regardless of leases. Outstanding leases
    /// keep their handle alive until they are dropped.
    pub fn remove(&self, sandbox_id: &str) -> bool {
        self.lock().remove(sandbox_id).is_some()
    }

    /// Remove idle, unleased entries. Returns the evicted ids.
    pub fn evict_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.lock().retain(|id, entry| {
            let keep = entry.leases > 0 || now.duration_since(entry.last_access) < self.ttl;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        for id in &evicted {
            tracing::debug!(sandbox_id = %id, "evicted idle sandbox handle");
        }
        evicted
    }

    pub fn contains(&self, sandbox_id: &str) -> bool {
        self.lock().contains_key(sandbox_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn leases(&self, sandbox_id: &str) -> usize {
        self.lock().get(sandbox_id).map_or(0, |e| e.leases)
    }

    /// Periodically evict idle entries. The task ends once the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.evict_expired();
            }
        })
    }
}

/// A leased sandbox handle. Returning the lease (on drop) restarts the
/// entry's idle clock.
pub struct SandboxLease {
    handle: Arc<dyn Sandbox>,
    cache: Weak<SandboxCache>,
}

impl SandboxLease {
    /// A lease that is not tracked by any cache.
    pub fn detached(handle: Arc<dyn Sandbox>) -> Self {
        Self {
            handle,
            cache: Weak::new(),
        }
    }

    pub fn handle(&self) -> Arc<dyn Sandbox> {
        Arc::clone(&self.handle)
    }
}

impl Deref for SandboxLease {
    type Target = dyn Sandbox;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.return_lease(self.handle.id());
        }
    }
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease")
            .field("sandbox_id", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySandbox;

    const TTL: Duration = Duration::from_secs(300);

    fn sandbox(id: &str) -> Arc<dyn Sandbox> {
        Arc::new(MemorySandbox::new(id))
    }

    #[tokio::test(start_paused = true)]
    async fn leased_entry_survives_ttl() {
        let cache = SandboxCache::new(TTL);
        let lease = cache.insert_and_lease(sandbox("a"));
        tokio::time::advance(TTL * 2).await;
        assert!(cache.evict_expired().is_empty());
        assert!(cache.contains("a"));

        drop(lease);
        assert_eq!(cache.leases("a"), 0);
        // Returning the lease restarted the idle clock.
        tokio::time::advance(TTL / 2).await;
        assert!(cache.evict_expired().is_empty());
        tokio::time::advance(TTL).await;
        assert_eq!(cache.evict_expired(), vec!["a".to_string()]);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn access_renews_ttl() {
        let cache = SandboxCache::new(TTL);
        drop(cache.insert_and_lease(sandbox("a")));
        tokio::time::advance(TTL - Duration::from_secs(10)).await;
        drop(cache.lease("a").unwrap());
        tokio::time::advance(TTL - Duration::from_secs(10)).await;
        assert!(cache.evict_expired().is_empty());
    }

    #[test]
    fn one_handle_per_id() {
        let cache = SandboxCache::new(TTL);
        let first = cache.insert_and_lease(sandbox("a"));
        let second = cache.insert_and_lease(sandbox("a"));
        assert!(Arc::ptr_eq(&first.handle(), &second.handle()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.leases("a"), 2);
    }

    #[test]
    fn remove_keeps_outstanding_lease_usable() {
        let cache = SandboxCache::new(TTL);
        let lease = cache.insert_and_lease(sandbox("a"));
        assert!(cache.remove("a"));
        assert!(!cache.contains("a"));
        assert_eq!(lease.id(), "a");
        drop(lease);
        assert!(cache.lease("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_entries() {
        let cache = SandboxCache::new(Duration::from_secs(5));
        drop(cache.insert_and_lease(sandbox("a")));
        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!cache.contains("a"));
        sweeper.abort();
    }
}
