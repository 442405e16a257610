//! Memory index status tracking.
//!
//! A dependency-injected cache recording which indexes have passed a
//! reachability probe. Constructed once at process start, shared by
//! reference, refreshed on demand. Never static state.

use std::collections::HashSet;

use tokio::sync::RwLock;
use tracing::debug;

use engram_core::error::MemoryError;

/// Tracks which memory indexes are known to be reachable.
pub struct IndexStatusCache {
    ready: RwLock<HashSet<String>>,
}

impl IndexStatusCache {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(HashSet::new()),
        }
    }

    /// Whether the index has already passed its probe.
    pub async fn is_ready(&self, index: &str) -> bool {
        self.ready.read().await.contains(index)
    }

    /// Run the probe for an index unless it has already passed. A probe
    /// that succeeds is cached; a failing probe is retried on the next call.
    pub async fn ensure_ready<F, Fut>(&self, index: &str, probe: F) -> Result<(), MemoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), MemoryError>>,
    {
        if self.is_ready(index).await {
            return Ok(());
        }
        probe().await?;
        debug!(index, "Memory index probe succeeded");
        self.ready.write().await.insert(index.to_string());
        Ok(())
    }

    /// Forget a cached probe result so the next call re-checks.
    pub async fn refresh(&self, index: &str) {
        self.ready.write().await.remove(index);
    }
}

impl Default for IndexStatusCache {
    fn default() -> Self {
        Self::new()
    }
}
