//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{self, RateLimitService};
use crate::error::{FloodgateError, Result};
use crate::ratelimit::RateLimitBackend;

/// HTTP server for the rate limit service.
pub struct HttpServer<R: RateLimitBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<R>,
    /// Degraded-mode policy handed to the service layer.
    fail_open: bool,
}

impl<R: RateLimitBackend + 'static> HttpServer<R> {
    /// Create a new HTTP server around the given rate limiter.
    pub fn new(addr: SocketAddr, limiter: Arc<R>, fail_open: bool) -> Self {
        Self {
            addr,
            limiter,
            fail_open,
        }
    }

    fn router(&self) -> Router {
        let state = Arc::new(RateLimitService::new(self.limiter.clone(), self.fail_open));
        Router::new()
            .route("/", post(service::dispatch::<R>))
            .route("/health", get(service::health))
            .with_state(state)
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let app = self.router();

        info!(addr = %self.addr, "Starting HTTP server for rate limit service");

        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            FloodgateError::Io(e)
        })
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        info!(
            addr = %self.addr,
            "Starting HTTP server for rate limit service with graceful shutdown"
        );

        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                FloodgateError::Io(e)
            })
    }
}
