use common::ReconciliationEvent;

use crate::error::ReconcileError;

/// Result of handling one event delivery.
#[derive(Debug)]
pub enum Outcome {
    Handled,
    /// Re-queue `event` (already marked deferred) and retry later.
    Deferred {
        event: ReconciliationEvent,
        cause: ReconcileError,
    },
    /// Stop reconciling this event and surface the error.
    Fatal(ReconcileError),
}

impl Outcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }
}
