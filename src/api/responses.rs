// Response types and HTTP mapping of coordination outcomes

use crate::core::errors::CoordinationError;
use crate::core::models::{AuthorizationResult, RateLimitResult};
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub backend: String,
}

/// API error type that converts domain outcomes to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reasons: Vec<String>,
    pub headers: HeaderMap,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            message,
            reasons: Vec::new(),
            headers: HeaderMap::new(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// 403 carrying every failure reason of the decision
    pub fn forbidden(result: &AuthorizationResult) -> Self {
        Self {
            reasons: result.failure_reasons.clone(),
            ..Self::new(StatusCode::FORBIDDEN, "Access denied".to_string())
        }
    }

    /// 429 with `Retry-After` and `X-RateLimit-*` headers
    pub fn rate_limited(result: &RateLimitResult, now: DateTime<Utc>) -> Self {
        let mut headers = rate_limit_headers(result);
        insert_numeric(&mut headers, "retry-after", result.retry_after(now));
        Self {
            headers,
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string())
        }
    }

    pub fn from_coordination_error(err: CoordinationError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.user_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            reasons: self.reasons,
            request_id: self.request_id,
        });
        (self.status, self.headers, body).into_response()
    }
}

impl From<CoordinationError> for ApiError {
    fn from(err: CoordinationError) -> Self {
        ApiError::from_coordination_error(err)
    }
}

/// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset` (unix seconds)
pub fn rate_limit_headers(result: &RateLimitResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_numeric(&mut headers, "x-ratelimit-limit", result.limit);
    insert_numeric(&mut headers, "x-ratelimit-remaining", result.remaining);
    insert_numeric(&mut headers, "x-ratelimit-reset", result.reset_time.timestamp().max(0) as u64);
    headers
}

fn insert_numeric(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}
