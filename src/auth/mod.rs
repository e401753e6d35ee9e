// Authorization audit trail

pub mod audit_logger;

pub use audit_logger::{AuditLogger, AuthzEvent};
