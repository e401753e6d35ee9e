// Cancellation and timeout guard for store calls

use crate::core::errors::CoordinationError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run a store operation bound to the caller's cancellation token and a timeout.
///
/// A cancelled token abandons the in-flight call (the future is dropped) and
/// yields `Cancelled`; an elapsed timeout yields `Timeout`. Callers map both
/// through their own failure policy exactly as they map store errors.
pub async fn guarded<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    operation: F,
) -> Result<T, CoordinationError>
where
    F: Future<Output = Result<T, CoordinationError>>,
{
    if cancel.is_cancelled() {
        return Err(CoordinationError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoordinationError::Cancelled),
        outcome = tokio::time::timeout(timeout, operation) => match outcome {
            Ok(result) => result,
            Err(_) => Err(CoordinationError::Timeout(timeout.as_millis() as u64)),
        },
    }
}
