use async_trait::async_trait;

/// Client-side caches the dispatcher signals after fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTarget {
    Notifications,
    BadgeCounts,
    Conversations,
}

/// Built-in reaction seam. The embedding app points this at its query
/// cache; the signals run after external subscribers, with the same event,
/// and subscribers cannot cancel them.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, target: CacheTarget);
}

/// Default implementation for apps without a cache layer.
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, target: CacheTarget) {
        tracing::debug!(?target, "cache invalidation signal (noop)");
    }
}
