use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::TaskId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(format!("evt_{}", Uuid::new_v4().simple()))
    }
}

/// Recognized event kinds, per SPEC_FULL.md §3. Each variant carries only
/// the fields that type of event actually needs; `event_type` on the wire
/// is the serde tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventBody {
    #[serde(rename = "TASK_CREATED")]
    TaskCreated,
    #[serde(rename = "STATUS_CHANGED")]
    StatusChanged { from_status: String, to_status: String, reason_code: Option<String> },
    #[serde(rename = "STAGE_CHANGED")]
    StageChanged { stage: String },
    #[serde(rename = "RUN_REQUESTED")]
    RunRequested { idempotency_key: Option<String> },
    #[serde(rename = "BLOCKED_POLICY")]
    BlockedPolicy { reason_code: String },
    #[serde(rename = "APPROVAL_REQUESTED")]
    ApprovalRequested { queue_id: String, reason_code: String },
    #[serde(rename = "HUMAN_APPROVED")]
    HumanApproved { queue_id: String, acted_by: String },
    #[serde(rename = "HUMAN_REJECTED")]
    HumanRejected { queue_id: String, acted_by: String },
    #[serde(rename = "RETRY_STARTED")]
    RetryStarted { retry_count: u32 },
}

impl EventBody {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventBody::TaskCreated => "TASK_CREATED",
            EventBody::StatusChanged { .. } => "STATUS_CHANGED",
            EventBody::StageChanged { .. } => "STAGE_CHANGED",
            EventBody::RunRequested { .. } => "RUN_REQUESTED",
            EventBody::BlockedPolicy { .. } => "BLOCKED_POLICY",
            EventBody::ApprovalRequested { .. } => "APPROVAL_REQUESTED",
            EventBody::HumanApproved { .. } => "HUMAN_APPROVED",
            EventBody::HumanRejected { .. } => "HUMAN_REJECTED",
            EventBody::RetryStarted { .. } => "RETRY_STARTED",
        }
    }

    pub fn is_blocked_policy(&self) -> bool {
        matches!(self, EventBody::BlockedPolicy { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: EventId,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, body: EventBody, now: DateTime<Utc>) -> Self {
        Self { event_id: EventId::generate(), task_id, created_at: now, body }
    }
}
