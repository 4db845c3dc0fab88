//! Shared background-sweep loop.
//!
//! Both expiring maps in this crate (upload sessions and streaming tokens)
//! run the same loop: tick on a fixed period, ask the target to evict what
//! has expired. The on-evict behavior lives with the target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Evict expired entries, performing any per-entry cleanup.
    async fn sweep(&self);
}

/// Spawn a sweep loop on the given period. The first sweep happens one full
/// period after startup.
pub fn spawn(name: &'static str, period: Duration, target: Arc<dyn Sweep>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first interval tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::trace!(janitor = name, "sweeping");
            target.sweep().await;
        }
    })
}
