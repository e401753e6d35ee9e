// Request handlers for API endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::responses::{ApiError, HealthResponse};
use crate::api::CoordinationState;
use crate::cache::invalidation::{InvalidationBatch, InvalidationReport};
use crate::core::models::{AuthorizationResult, Principal, ResourceContext};

const HEALTH_PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Health check handler
///
/// GET /health
///
/// Always 200 so orchestrators keep routing: a slow or failed store ping is
/// reported as `degraded` since the limiter and cache keep working on the
/// fallback store.
pub async fn health_handler(State(state): State<CoordinationState>) -> Json<HealthResponse> {
    let store_status = match tokio::time::timeout(HEALTH_PING_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => "connected".to_string(),
        Ok(Err(e)) => {
            warn!(error = %e, "Store ping failed");
            format!("unavailable: {}", e.user_message())
        }
        Err(_) => {
            debug!("Store ping timed out in health check");
            "slow: timeout".to_string()
        }
    };

    let status = if store_status == "connected" { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        store: store_status,
        backend: state.store.backend_name().to_string(),
    })
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<CoordinationState>) -> Result<Response, ApiError> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Manual cache invalidation
///
/// POST /v1/cache/invalidate with `{"keys": [..], "patterns": [..], "tags": [..]}`
pub async fn invalidate_handler(
    State(state): State<CoordinationState>,
    Json(batch): Json<InvalidationBatch>,
) -> Result<Json<InvalidationReport>, ApiError> {
    if batch.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Provide at least one key, pattern or tag".to_string(),
        ));
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let report = state.invalidation.invalidate_batch(batch, &cancel).await;
    info!(
        removed = report.total_removed(),
        errors = report.errors.len(),
        "Manual invalidation finished"
    );
    Ok(Json(report))
}

/// Authorization check request body
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub principal_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub resource_type: String,
    pub action: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Authorization decision
///
/// POST /v1/authorize; 200 with the decision when granted, 403 with every
/// failure reason when denied.
pub async fn authorize_handler(
    State(state): State<CoordinationState>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizationResult>, ApiError> {
    let principal = Principal::new(request.principal_id).with_roles(request.roles);
    let resource = request
        .resource_id
        .map(|id| ResourceContext::new(id).with_attributes(request.attributes));

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let result = state
        .authorization
        .authorize(
            &principal,
            &request.resource_type,
            &request.action,
            resource.as_ref(),
            &cancel,
        )
        .await;

    if result.succeeded {
        Ok(Json(result))
    } else {
        Err(ApiError::forbidden(&result))
    }
}
