// Request-path rate limiting stage

use crate::api::responses::{rate_limit_headers, ApiError};
use crate::api::CoordinationState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header carrying the authenticated caller, set by the upstream gateway
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

const ANONYMOUS: &str = "anonymous";

/// Caller identity used as the rate-limit subject
pub fn extract_principal(headers: &HeaderMap) -> String {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Rate limiting middleware
///
/// Key: `{principal}:{path}`. Limit, window and algorithm come from config.
/// Denied requests get 429 without reaching the handler; admitted ones carry
/// `X-RateLimit-*` headers. A dropped request cancels its pending store call.
pub async fn rate_limit_middleware(
    State(state): State<CoordinationState>,
    request: Request,
    next: Next,
) -> Response {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let key = format!("{}:{}", extract_principal(request.headers()), request.uri().path());
    let config = &state.config;
    let result = state
        .rate_limiter
        .check_and_increment(
            &key,
            config.rate_limit_default_limit,
            Duration::from_secs(config.rate_limit_default_window_secs),
            config.rate_limit_algorithm,
            &cancel,
        )
        .await;

    if !result.allowed {
        debug!(key = %key, count = result.current_count, "Request rejected by rate limiter");
        return ApiError::rate_limited(&result, state.rate_limiter.now()).into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(rate_limit_headers(&result));
    response
}
