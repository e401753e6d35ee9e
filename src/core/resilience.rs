use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error, StateMachine};
use std::future::Future;
use std::time::Duration;
use crate::core::errors::CoordinationError;

/// Circuit breaker guarding calls to the shared store
///
/// Policy:
/// - `failure_threshold` consecutive failures trips the breaker OPEN
/// - `cooldown` before HALF-OPEN lets one trial call through
pub type StoreCircuitBreaker = StateMachine<
    failure_policy::ConsecutiveFailures<backoff::Constant>,
    ()
>;

/// Create a circuit breaker with the given threshold and cool-down
pub fn create_circuit_breaker(failure_threshold: u32, cooldown: Duration) -> StoreCircuitBreaker {
    Config::new()
        .failure_policy(failure_policy::consecutive_failures(
            failure_threshold,
            backoff::constant(cooldown),
        ))
        .build()
}

/// Execute a store call within the circuit breaker protection
///
/// Handles:
/// - Circuit state checks (Closed/Open/Half-Open)
/// - Failure counting
/// - Mapping a rejected call (circuit open) to `StoreUnavailable`
pub async fn execute_with_cb<Fut, T>(
    cb: &StoreCircuitBreaker,
    operation: Fut,
) -> Result<T, CoordinationError>
where
    Fut: Future<Output = Result<T, CoordinationError>>,
{
    match cb.call(operation).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(e),
        Err(Error::Rejected) => Err(CoordinationError::StoreUnavailable(
            "Circuit breaker open: shared store marked unavailable".to_string(),
        )),
    }
}
