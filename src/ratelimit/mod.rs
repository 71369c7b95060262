//! Rate limiting logic and state management.

mod backend;
mod clock;
mod limiter;
mod sweeper;
mod window;

pub use backend::{Decision, RateLimitBackend, SweepStats};
pub use clock::{Clock, SystemClock};
pub use limiter::{RateLimiter, DEFAULT_RETENTION};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
pub use window::RateWindow;
