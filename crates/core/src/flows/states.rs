use serde::{Deserialize, Serialize};

use crate::domain::task::TaskStatus;

/// The events that can drive a `Task` across the state machine in
/// spec.md §4.5. Each variant corresponds to exactly one edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    Run,
    PolicyBlocked,
    ExceptionRetry,
    AutoRetry,
    ExceptionExhausted,
    Success,
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub event: TaskEvent,
}
