//! Periodic idle eviction.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

/// Call `evict(idle_for)` every `interval` until shutdown.
pub async fn run_reaper<F>(
    pool: &'static str,
    interval: Duration,
    idle_for: Duration,
    evict: F,
    mut shutdown: broadcast::Receiver<()>,
) where
    F: Fn(Duration) -> usize + Send,
{
    tracing::debug!(pool, interval_secs = interval.as_secs(), "Pool reaper starting");

    let mut ticker = time::interval(interval);
    // the first tick fires immediately; nothing is idle yet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = evict(idle_for);
                if evicted > 0 {
                    tracing::debug!(pool, evicted, "Reaped idle resources");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!(pool, "Pool reaper stopping");
                break;
            }
        }
    }
}
