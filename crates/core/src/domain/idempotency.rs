use serde::{Deserialize, Serialize};

use crate::domain::task::TaskId;

/// Mapping from `(task_id, idempotency_key)` to `task_id`, per spec.md §3.
/// Presence alone is the deduplication signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub task_id: TaskId,
    pub idempotency_key: String,
    pub task_ref: TaskId,
}

impl IdempotencyRecord {
    pub fn new(task_id: TaskId, idempotency_key: impl Into<String>) -> Self {
        let idempotency_key = idempotency_key.into();
        Self { task_ref: task_id.clone(), task_id, idempotency_key }
    }
}
