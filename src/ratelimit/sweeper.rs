//! Periodic retention sweep.
//!
//! Stands in for the host's alarm facility: a background task that invokes
//! [`RateLimitBackend::sweep`] on a fixed interval. The loop re-arms
//! unconditionally after every invocation; a failed sweep is logged loudly
//! and retried at the next tick, because silently stopping cleanup would
//! let abandoned keys accumulate forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use super::backend::RateLimitBackend;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Background task driving the retention sweep of a rate limiter.
pub struct Sweeper<R: RateLimitBackend + 'static> {
    limiter: Arc<R>,
    interval: Duration,
}

impl<R: RateLimitBackend + 'static> Sweeper<R> {
    /// Create a sweeper for the given backend.
    pub fn new(limiter: Arc<R>, interval: Duration) -> Self {
        Self { limiter, interval }
    }

    /// Spawn the sweep loop.
    ///
    /// The first sweep fires one interval after spawning, and each
    /// completed sweep schedules the next one interval later. Dropping the
    /// returned handle does not stop the task; abort it to do so.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.limiter.sweep().await {
                    Ok(stats) => debug!(
                        removed_keys = stats.removed_keys,
                        pruned_timestamps = stats.pruned_timestamps,
                        live_keys = stats.live_keys,
                        "Retention sweep complete"
                    ),
                    // Cleanup must keep running: surface the fault and let
                    // the loop re-arm.
                    Err(e) => error!(error = %e, "Retention sweep failed; will retry at next interval"),
                }
            }
        })
    }
}
