use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::TaskId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalQueueId(pub String);

impl ApprovalQueueId {
    pub fn generate() -> Self {
        Self(format!("aq_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            "EXPIRED" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }
}

/// A pending human decision attached to a task, per spec.md §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub queue_id: ApprovalQueueId,
    pub task_id: TaskId,
    pub request_id: String,
    pub reason_code: String,
    pub reason_message: String,
    pub requested_by: String,
    pub approver_group: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalItem {
    pub fn new(
        task_id: TaskId,
        reason_code: impl Into<String>,
        requested_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let reason_code = reason_code.into();
        let request_id = format!("req_{}", &Uuid::new_v4().simple().to_string()[..10]);
        Self {
            queue_id: ApprovalQueueId::generate(),
            task_id,
            request_id,
            reason_message: format!("approval required: {reason_code}"),
            reason_code,
            requested_by: requested_by.into(),
            approver_group: "ops_team".to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: None,
            resolved_at: None,
        }
    }
}
