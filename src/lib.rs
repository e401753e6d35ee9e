// Library root for the coordination core: atomic store, rate limiter,
// cache invalidation and resource authorization

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod core;
pub mod engine;
pub mod loader;
pub mod state;
pub mod telemetry;

pub use crate::config::Config;
pub use crate::core::errors::CoordinationError;
