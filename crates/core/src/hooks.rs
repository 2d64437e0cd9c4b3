//! Side-channel collaborators consulted by the loop but never gating it.

use async_trait::async_trait;

/// Relationship and learning hooks, fired once per cycle.
///
/// Callers spawn these and do not await them; a slow or failing hook must not
/// delay the cycle.
#[async_trait]
pub trait SocialHooks: Send + Sync {
    /// Build (and cache) relationship context for the stream.
    async fn relationship_context(&self, stream_id: &str);

    /// Kick off expression / style learning for the stream.
    async fn trigger_learning(&self, stream_id: &str);
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl SocialHooks for NoopHooks {
    async fn relationship_context(&self, _stream_id: &str) {}

    async fn trigger_learning(&self, _stream_id: &str) {}
}

/// The sleep/wake state machine, read-only from the loop's point of view.
#[async_trait]
pub trait SleepMonitor: Send + Sync {
    async fn is_sleeping(&self) -> bool;
}
