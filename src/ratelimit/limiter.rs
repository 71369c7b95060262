//! Core rate limiter implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::{Decision, RateLimitBackend, SweepStats};
use super::clock::{Clock, SystemClock};
use super::window::RateWindow;
use crate::error::Result;

/// How long accepted timestamps are retained before the sweep discards
/// them. Deliberately longer than any sane per-call window: the sweep is
/// memory hygiene, not rate-limit semantics.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// The core sliding-window rate limiter.
///
/// One instance exclusively owns one key-space partition. Every operation
/// (`check`, `reset`, the sweep) is a serialized read-modify-write over the
/// registry, so concurrent callers can never lose updates to a key's
/// timestamp sequence.
pub struct RateLimiter {
    /// Request windows indexed by caller-supplied key.
    registry: Mutex<HashMap<String, RateWindow>>,
    /// Clock used for every decision; injectable for tests.
    clock: Arc<dyn Clock>,
    /// Sweep retention horizon.
    retention: Duration,
}

impl RateLimiter {
    /// Create a rate limiter with the system clock and default retention.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            clock,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Override the sweep retention horizon.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of stored timestamps for a key, live or expired.
    ///
    /// Returns `None` if the key is not tracked at all.
    pub fn stored_count(&self, key: &str) -> Option<usize> {
        self.registry.lock().get(key).map(|w| w.len())
    }

    fn decide(&self, key: &str, window_seconds: u64, max_requests: u32) -> Decision {
        let now = self.clock.now_ms();
        let window_ms = (window_seconds as i64).saturating_mul(1000);
        let cutoff = now.saturating_sub(window_ms);

        let mut registry = self.registry.lock();
        let mut recent = registry
            .get(key)
            .map(|w| w.live(cutoff))
            .unwrap_or_default();

        trace!(key, live = recent.len(), "Checking rate limit");

        if recent.len() >= max_requests as usize {
            // Denied requests do not count against the window: stored state
            // stays untouched, so an immediate retry sees the same verdict
            // until the oldest entry expires.
            let oldest = recent.first().copied().unwrap_or(now);
            debug!(key, requests = recent.len(), "Rate limit exceeded");
            return Decision {
                allowed: false,
                remaining: 0,
                reset_time_ms: oldest + window_ms,
                request_count: recent.len(),
            };
        }

        recent.push(now);
        let oldest = recent[0];
        let decision = Decision {
            allowed: true,
            remaining: max_requests.saturating_sub(recent.len() as u32),
            reset_time_ms: oldest + window_ms,
            request_count: recent.len(),
        };

        // Writing back the filtered sequence is the point where expired
        // entries actually leave storage.
        registry.insert(key.to_string(), RateWindow::from_timestamps(recent));
        decision
    }

    fn clear(&self, key: Option<&str>) {
        let mut registry = self.registry.lock();
        match key {
            Some(key) => {
                registry.remove(key);
                debug!(key, "Rate limit history cleared");
            }
            None => {
                let keys = registry.len();
                registry.clear();
                debug!(keys, "All rate limit history cleared");
            }
        }
    }

    fn run_sweep(&self) -> SweepStats {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(self.retention.as_millis() as i64);

        let mut registry = self.registry.lock();
        let keys_before = registry.len();
        let mut pruned = 0;
        registry.retain(|_, window| {
            pruned += window.prune(cutoff);
            !window.is_empty()
        });

        SweepStats {
            removed_keys: keys_before - registry.len(),
            pruned_timestamps: pruned,
            live_keys: registry.len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitBackend for RateLimiter {
    async fn check(&self, key: &str, window_seconds: u64, max_requests: u32) -> Result<Decision> {
        Ok(self.decide(key, window_seconds, max_requests))
    }

    async fn reset(&self, key: Option<&str>) -> Result<()> {
        self.clear(key);
        Ok(())
    }

    async fn sweep(&self) -> Result<SweepStats> {
        Ok(self.run_sweep())
    }
}
