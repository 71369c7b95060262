//! Rate limiter trait for abstracting over limiter implementations.

use async_trait::async_trait;

use crate::error::Result;

/// The verdict for a single `check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is within budget.
    pub allowed: bool,
    /// Requests still available in the current window. Zero when denied.
    pub remaining: u32,
    /// Epoch milliseconds at which the oldest counted request expires and a
    /// slot frees up.
    pub reset_time_ms: i64,
    /// Number of requests counted in the window, including this one when
    /// allowed.
    pub request_count: usize,
}

/// Counters reported by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys removed because every timestamp aged past the horizon.
    pub removed_keys: usize,
    /// Individual stale timestamps pruned from surviving keys.
    pub pruned_timestamps: usize,
    /// Keys remaining in the registry after the sweep.
    pub live_keys: usize,
}

/// Trait for rate limiter implementations.
///
/// This abstracts the in-memory [`RateLimiter`](super::RateLimiter) behind a
/// seam so the HTTP service can be generic over it, and so tests can inject
/// a failing implementation to exercise the fail-open path.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Decide whether a new request for `key` is allowed under a sliding
    /// window of `window_seconds` admitting at most `max_requests`.
    ///
    /// Both limit parameters are supplied per call; two calls for the same
    /// key may legally carry different limits.
    async fn check(&self, key: &str, window_seconds: u64, max_requests: u32) -> Result<Decision>;

    /// Forget history for `key`, or for every key when `None`. Idempotent.
    async fn reset(&self, key: Option<&str>) -> Result<()>;

    /// Drop timestamps older than the retention horizon and remove keys
    /// left empty.
    async fn sweep(&self) -> Result<SweepStats>;
}
