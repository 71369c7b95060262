//! Rate limit request handling.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ratelimit::RateLimitBackend;

/// Reset horizon reported when no real decision could be made.
const FAILURE_RESET_HORIZON_MS: i64 = 60 * 60 * 1000;

/// Handler state for the rate limit actions.
pub struct RateLimitService<R: RateLimitBackend> {
    /// The rate limiter instance
    limiter: Arc<R>,
    /// Whether failures while deciding degrade to "allowed".
    ///
    /// Fail-open trades strictness for availability: a limiter outage must
    /// not block legitimate traffic, and the protected resource keeps its
    /// own last-line checks. The degraded response carries an `error` field
    /// so callers can tell it apart from a genuine allow.
    fail_open: bool,
}

impl<R: RateLimitBackend> RateLimitService<R> {
    /// Create a new service around the given limiter.
    pub fn new(limiter: Arc<R>, fail_open: bool) -> Self {
        Self { limiter, fail_open }
    }
}

/// Query parameters selecting the action to perform.
#[derive(Debug, Deserialize)]
pub struct ActionParams {
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequest {
    #[serde(rename = "clientIP")]
    client_ip: String,
    window_seconds: u64,
    max_requests: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    #[serde(rename = "clientIP")]
    client_ip: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckAllowed {
    allowed: bool,
    remaining: u32,
    reset_time: i64,
    requests: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckDenied {
    allowed: bool,
    remaining: u32,
    reset_time: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckDegraded {
    allowed: bool,
    remaining: u32,
    reset_time: i64,
    error: String,
}

#[derive(Debug, Serialize)]
struct ResetOk {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct ResetFailed {
    success: bool,
    error: String,
}

/// Route a rate limiter request by its `action` query parameter.
pub async fn dispatch<R: RateLimitBackend + 'static>(
    State(service): State<Arc<RateLimitService<R>>>,
    Query(params): Query<ActionParams>,
    body: Bytes,
) -> Response {
    match params.action.as_deref() {
        Some("check") => check(&service, &body).await,
        Some("reset") => reset(&service, &body).await,
        other => {
            warn!(action = ?other, "Unknown rate limiter action");
            (
                StatusCode::BAD_REQUEST,
                "Unknown action. Use ?action=check or ?action=reset.",
            )
                .into_response()
        }
    }
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn check<R: RateLimitBackend>(service: &RateLimitService<R>, body: &[u8]) -> Response {
    let request: CheckRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return degraded(service, format!("Malformed check request: {}", e)),
    };

    match service
        .limiter
        .check(
            &request.client_ip,
            request.window_seconds,
            request.max_requests,
        )
        .await
    {
        Ok(decision) if decision.allowed => {
            debug!(
                key = %request.client_ip,
                remaining = decision.remaining,
                "Request allowed"
            );
            (
                StatusCode::OK,
                Json(CheckAllowed {
                    allowed: true,
                    remaining: decision.remaining,
                    reset_time: decision.reset_time_ms,
                    requests: decision.request_count,
                }),
            )
                .into_response()
        }
        Ok(decision) => {
            debug!(key = %request.client_ip, "Request denied");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(CheckDenied {
                    allowed: false,
                    remaining: 0,
                    reset_time: decision.reset_time_ms,
                    message: "Rate limit exceeded. Try again later.".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => degraded(service, format!("Rate limiter failure: {}", e)),
    }
}

/// Convert a failure into the configured degraded response.
fn degraded<R: RateLimitBackend>(service: &RateLimitService<R>, error: String) -> Response {
    let reset_time = Utc::now().timestamp_millis() + FAILURE_RESET_HORIZON_MS;
    if service.fail_open {
        warn!(error = %error, "Rate limiter degraded; failing open");
        (
            StatusCode::OK,
            Json(CheckDegraded {
                allowed: true,
                remaining: 1,
                reset_time,
                error,
            }),
        )
            .into_response()
    } else {
        warn!(error = %error, "Rate limiter degraded; failing closed");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(CheckDenied {
                allowed: false,
                remaining: 0,
                reset_time,
                message: "Rate limiter unavailable".to_string(),
            }),
        )
            .into_response()
    }
}

async fn reset<R: RateLimitBackend>(service: &RateLimitService<R>, body: &[u8]) -> Response {
    let request: ResetRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return reset_failed(format!("Malformed reset request: {}", e)),
    };

    match service.limiter.reset(request.client_ip.as_deref()).await {
        Ok(()) => {
            let message = match &request.client_ip {
                Some(ip) => format!("Rate limit reset for {}", ip),
                None => "All rate limits reset".to_string(),
            };
            info!(key = ?request.client_ip, "Rate limit reset");
            (
                StatusCode::OK,
                Json(ResetOk {
                    success: true,
                    message,
                }),
            )
                .into_response()
        }
        Err(e) => reset_failed(e.to_string()),
    }
}

fn reset_failed(error: String) -> Response {
    warn!(error = %error, "Rate limit reset failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ResetFailed {
            success: false,
            error,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FloodgateError, Result};
    use crate::ratelimit::{Decision, RateLimiter, SweepStats};
    use async_trait::async_trait;
    use serde_json::Value;

    /// Backend that fails every operation.
    struct FailingBackend;

    #[async_trait]
    impl RateLimitBackend for FailingBackend {
        async fn check(
            &self,
            _key: &str,
            _window_seconds: u64,
            _max_requests: u32,
        ) -> Result<Decision> {
            Err(FloodgateError::Storage("registry unavailable".into()))
        }

        async fn reset(&self, _key: Option<&str>) -> Result<()> {
            Err(FloodgateError::Storage("registry unavailable".into()))
        }

        async fn sweep(&self) -> Result<SweepStats> {
            Err(FloodgateError::Storage("registry unavailable".into()))
        }
    }

    fn in_memory(fail_open: bool) -> Arc<RateLimitService<RateLimiter>> {
        Arc::new(RateLimitService::new(Arc::new(RateLimiter::new()), fail_open))
    }

    async fn call<R: RateLimitBackend + 'static>(
        service: Arc<RateLimitService<R>>,
        action: Option<&str>,
        body: &str,
    ) -> Response {
        dispatch(
            State(service),
            Query(ActionParams {
                action: action.map(String::from),
            }),
            Bytes::from(body.to_string()),
        )
        .await
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn check_allows_within_budget() {
        let service = in_memory(true);
        let body = r#"{"clientIP": "1.2.3.4", "windowSeconds": 60, "maxRequests": 3}"#;

        for expected_remaining in [2, 1, 0] {
            let response = call(service.clone(), Some("check"), body).await;
            assert_eq!(response.status(), StatusCode::OK);

            let json = json_body(response).await;
            assert_eq!(json["allowed"], Value::Bool(true));
            assert_eq!(json["remaining"], expected_remaining);
            assert!(json["resetTime"].as_i64().unwrap() > 0);
            assert_eq!(json["requests"], 3 - expected_remaining);
        }
    }

    #[tokio::test]
    async fn check_denies_with_429_beyond_budget() {
        let service = in_memory(true);
        let body = r#"{"clientIP": "1.2.3.4", "windowSeconds": 60, "maxRequests": 1}"#;

        call(service.clone(), Some("check"), body).await;
        let response = call(service.clone(), Some("check"), body).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let json = json_body(response).await;
        assert_eq!(json["allowed"], Value::Bool(false));
        assert_eq!(json["remaining"], 0);
        assert!(json["message"].as_str().unwrap().contains("Rate limit"));
    }

    #[tokio::test]
    async fn malformed_check_body_fails_open() {
        let service = in_memory(true);

        let response = call(service, Some("check"), "not json").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["allowed"], Value::Bool(true));
        assert_eq!(json["remaining"], 1);
        assert!(json["error"].as_str().unwrap().contains("Malformed"));
    }

    #[tokio::test]
    async fn backend_failure_fails_open_by_default() {
        let service = Arc::new(RateLimitService::new(Arc::new(FailingBackend), true));
        let body = r#"{"clientIP": "1.2.3.4", "windowSeconds": 60, "maxRequests": 3}"#;

        let response = call(service, Some("check"), body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["allowed"], Value::Bool(true));
        assert!(json["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn backend_failure_fails_closed_when_configured() {
        let service = Arc::new(RateLimitService::new(Arc::new(FailingBackend), false));
        let body = r#"{"clientIP": "1.2.3.4", "windowSeconds": 60, "maxRequests": 3}"#;

        let response = call(service, Some("check"), body).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let json = json_body(response).await;
        assert_eq!(json["allowed"], Value::Bool(false));
    }

    #[tokio::test]
    async fn reset_single_key() {
        let service = in_memory(true);
        let check = r#"{"clientIP": "1.2.3.4", "windowSeconds": 60, "maxRequests": 1}"#;

        call(service.clone(), Some("check"), check).await;
        let denied = call(service.clone(), Some("check"), check).await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = call(
            service.clone(),
            Some("reset"),
            r#"{"clientIP": "1.2.3.4"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["success"], Value::Bool(true));
        assert_eq!(json["message"], "Rate limit reset for 1.2.3.4");

        // Behaves as a first-ever call again.
        let fresh = call(service, Some("check"), check).await;
        assert_eq!(fresh.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_without_key_clears_everything() {
        let service = in_memory(true);
        let check_a = r#"{"clientIP": "a", "windowSeconds": 60, "maxRequests": 1}"#;
        let check_b = r#"{"clientIP": "b", "windowSeconds": 60, "maxRequests": 1}"#;

        call(service.clone(), Some("check"), check_a).await;
        call(service.clone(), Some("check"), check_b).await;

        let response = call(service.clone(), Some("reset"), "{}").await;
        let json = json_body(response).await;
        assert_eq!(json["success"], Value::Bool(true));
        assert_eq!(json["message"], "All rate limits reset");

        assert_eq!(
            call(service.clone(), Some("check"), check_a).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            call(service, Some("check"), check_b).await.status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn malformed_reset_body_reports_failure() {
        let service = in_memory(true);

        let response = call(service, Some("reset"), "not json").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = json_body(response).await;
        assert_eq!(json["success"], Value::Bool(false));
        assert!(json["error"].as_str().unwrap().contains("Malformed"));
    }

    #[tokio::test]
    async fn unknown_action_is_bad_request() {
        let service = in_memory(true);
        let response = call(service, Some("purge"), "{}").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_action_is_bad_request() {
        let service = in_memory(true);
        let response = call(service, None, "{}").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_status() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
    }
}
