// Authorization audit events

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Authorization event worth an audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthzEvent {
    GrantIssued {
        principal_id: String,
        resource_type: String,
        resource_id: String,
        permission: String,
        granted_by: String,
        expires_at: DateTime<Utc>,
    },
    GrantRevoked {
        principal_id: String,
        resource_type: String,
        resource_id: String,
        permission: String,
        revoked_by: String,
        existed: bool,
    },
    AccessDenied {
        principal_id: String,
        resource_type: String,
        action: String,
        resource_id: Option<String>,
        reasons: Vec<String>,
        system_error: bool,
    },
}

/// Audit logger for authorization events
///
/// Every event is written as a structured `tracing` record. An optional
/// channel sink receives a copy (export pipelines, tests); a closed sink is
/// logged and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger {
    sink: Option<UnboundedSender<AuthzEvent>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self { sink: None }
    }

    pub fn with_sink(sink: UnboundedSender<AuthzEvent>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn log(&self, event: AuthzEvent) {
        match &event {
            AuthzEvent::GrantIssued {
                principal_id,
                resource_type,
                resource_id,
                permission,
                granted_by,
                expires_at,
            } => {
                info!(
                    principal_id = %principal_id,
                    resource_type = %resource_type,
                    resource_id = %resource_id,
                    permission = %permission,
                    granted_by = %granted_by,
                    expires_at = %expires_at,
                    "Permission granted"
                );
            }
            AuthzEvent::GrantRevoked {
                principal_id,
                resource_type,
                resource_id,
                permission,
                revoked_by,
                existed,
            } => {
                info!(
                    principal_id = %principal_id,
                    resource_type = %resource_type,
                    resource_id = %resource_id,
                    permission = %permission,
                    revoked_by = %revoked_by,
                    existed,
                    "Permission revoked"
                );
            }
            AuthzEvent::AccessDenied {
                principal_id,
                resource_type,
                action,
                resource_id,
                reasons,
                system_error,
            } => {
                if *system_error {
                    error!(
                        principal_id = %principal_id,
                        resource_type = %resource_type,
                        action = %action,
                        resource_id = ?resource_id,
                        reasons = ?reasons,
                        "Access denied: authorization store unavailable (fail-closed)"
                    );
                } else {
                    warn!(
                        principal_id = %principal_id,
                        resource_type = %resource_type,
                        action = %action,
                        resource_id = ?resource_id,
                        reasons = ?reasons,
                        "Access denied"
                    );
                }
            }
        }

        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                warn!("Audit sink closed, event kept in log only");
            }
        }
    }
}
