use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::ApprovalQueueId;
use crate::domain::task::TaskId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalActionId(pub String);

impl ApprovalActionId {
    pub fn generate() -> Self {
        Self(format!("aa_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalActionKind {
    Approve,
    Reject,
}

impl ApprovalActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalActionKind::Approve => "APPROVE",
            ApprovalActionKind::Reject => "REJECT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "APPROVE" => Some(ApprovalActionKind::Approve),
            "REJECT" => Some(ApprovalActionKind::Reject),
            _ => None,
        }
    }
}

/// Immutable record of an approve/reject decision, per spec.md §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub action_id: ApprovalActionId,
    pub queue_id: ApprovalQueueId,
    pub task_id: TaskId,
    pub action: ApprovalActionKind,
    pub acted_by: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalAction {
    pub fn new(
        queue_id: ApprovalQueueId,
        task_id: TaskId,
        action: ApprovalActionKind,
        acted_by: impl Into<String>,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: ApprovalActionId::generate(),
            queue_id,
            task_id,
            action,
            acted_by: acted_by.into(),
            comment,
            created_at: now,
        }
    }
}
