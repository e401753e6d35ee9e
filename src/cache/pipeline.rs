// Post-write pipeline stage: run the operation, then invalidate

use crate::cache::invalidation::{CacheInvalidating, InvalidationEngine, InvalidationReport};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Success indicator carried by an operation's output.
///
/// `None` means the output says nothing either way and is treated as success.
pub trait OperationOutcome {
    fn succeeded(&self) -> Option<bool>;
}

/// `Err` is a failure; an `Ok` payload is inspected and counts as success
/// when it carries no indicator of its own.
impl<T: OperationOutcome, E> OperationOutcome for Result<T, E> {
    fn succeeded(&self) -> Option<bool> {
        match self {
            Ok(output) => output.succeeded().or(Some(true)),
            Err(_) => Some(false),
        }
    }
}

impl OperationOutcome for bool {
    fn succeeded(&self) -> Option<bool> {
        Some(*self)
    }
}

impl OperationOutcome for () {
    fn succeeded(&self) -> Option<bool> {
        None
    }
}

impl OperationOutcome for Value {
    fn succeeded(&self) -> Option<bool> {
        let object = self.as_object()?;

        for field in ["success", "isSuccess", "succeeded"] {
            if let Some(flag) = object.get(field).and_then(Value::as_bool) {
                return Some(flag);
            }
        }
        if let Some(count) = object.get("errorCount").and_then(Value::as_u64) {
            return Some(count == 0);
        }
        if let Some(errors) = object.get("errors").and_then(Value::as_array) {
            return Some(errors.is_empty());
        }
        None
    }
}

/// Output of a staged operation and the invalidation it triggered, if any
#[derive(Debug)]
pub struct StageResult<T> {
    pub output: T,
    pub report: Option<InvalidationReport>,
}

impl<T> StageResult<T> {
    pub fn into_output(self) -> T {
        self.output
    }
}

/// Wraps business writes so affected cache entries are cleared after they run
#[derive(Clone)]
pub struct InvalidationStage {
    engine: Arc<InvalidationEngine>,
}

impl InvalidationStage {
    pub fn new(engine: Arc<InvalidationEngine>) -> Self {
        Self { engine }
    }

    pub async fn execute<C, T, F, Fut>(
        &self,
        trigger: &str,
        command: &C,
        operation: F,
        cancel: &CancellationToken,
    ) -> StageResult<T>
    where
        C: CacheInvalidating,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: OperationOutcome,
    {
        let output = operation().await;
        let success = output.succeeded().unwrap_or(true);

        if !success && command.invalidate_only_on_success() {
            debug!(trigger, "Operation failed, cache left untouched");
            return StageResult { output, report: None };
        }

        let report = self.engine.invalidate(command, trigger, cancel).await;
        StageResult {
            output,
            report: Some(report),
        }
    }
}
