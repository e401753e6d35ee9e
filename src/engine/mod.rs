// Rate limiting and authorization engines

pub mod authorization;
pub mod conditions;
pub mod permissions;
pub mod rate_limiter;

pub use authorization::AuthorizationService;
pub use permissions::{PermissionResolver, RoleHierarchy};
pub use rate_limiter::RateLimiter;
