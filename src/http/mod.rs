//! HTTP transport for the rate limit service.

mod server;
mod service;

pub use server::HttpServer;
pub use service::RateLimitService;
