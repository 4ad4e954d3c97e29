//! Per-query planning context
//!
//! Owns the variable registry for one query and the cooperative
//! cancellation flag. Each query gets its own context; nothing here is
//! shared between concurrently planned queries.

use crate::error::{PlannerError, PlannerResult};
use crate::variable::VariableRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle for requesting cancellation from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        CancellationHandle::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// State owned by one query for the duration of planning.
#[derive(Debug, Default)]
pub struct QueryContext {
    pub variables: VariableRegistry,
    cancellation: CancellationHandle,
}

impl QueryContext {
    pub fn new() -> Self {
        QueryContext::default()
    }

    /// A context whose cancellation is controlled by the given handle.
    pub fn with_cancellation(cancellation: CancellationHandle) -> Self {
        QueryContext {
            variables: VariableRegistry::new(),
            cancellation,
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Checked between rules and between frontier plans; on cancellation
    /// the planner drops all partial plans.
    pub fn check_cancelled(&self) -> PlannerResult<()> {
        if self.cancellation.is_cancelled() {
            Err(PlannerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_propagates_through_handle() {
        let handle = CancellationHandle::new();
        let ctx = QueryContext::with_cancellation(handle.clone());
        assert!(ctx.check_cancelled().is_ok());
        handle.cancel();
        assert_eq!(ctx.check_cancelled().unwrap_err(), PlannerError::Cancelled);
    }
}
