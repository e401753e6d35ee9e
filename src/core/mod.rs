// Core types: errors, models, time, cancellation, metrics, resilience

pub mod clock;
pub mod errors;
pub mod guard;
pub mod metrics;
pub mod models;
pub mod resilience;
