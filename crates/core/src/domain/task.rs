use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(format!("task_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ready,
    Running,
    FailedRetryable,
    NeedsHumanApproval,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::FailedRetryable => "FAILED_RETRYABLE",
            TaskStatus::NeedsHumanApproval => "NEEDS_HUMAN_APPROVAL",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "READY" => Some(TaskStatus::Ready),
            "RUNNING" => Some(TaskStatus::Running),
            "FAILED_RETRYABLE" => Some(TaskStatus::FailedRetryable),
            "NEEDS_HUMAN_APPROVAL" => Some(TaskStatus::NeedsHumanApproval),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Planner,
    Executor,
    Reviewer,
    Reporter,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Planner => "planner",
            PipelineStage::Executor => "executor",
            PipelineStage::Reviewer => "reviewer",
            PipelineStage::Reporter => "reporter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "planner" => Some(PipelineStage::Planner),
            "executor" => Some(PipelineStage::Executor),
            "reviewer" => Some(PipelineStage::Reviewer),
            "reporter" => Some(PipelineStage::Reporter),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RunTask,
    WaitForCompletion,
    ApproveOrReject,
    Retrying,
    None,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::RunTask => "run_task",
            NextAction::WaitForCompletion => "wait_for_completion",
            NextAction::ApproveOrReject => "approve_or_reject",
            NextAction::Retrying => "retrying",
            NextAction::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "run_task" => Some(NextAction::RunTask),
            "wait_for_completion" => Some(NextAction::WaitForCompletion),
            "approve_or_reject" => Some(NextAction::ApproveOrReject),
            "retrying" => Some(NextAction::Retrying),
            "none" => Some(NextAction::None),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub report_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub template_type: String,
    pub input: serde_json::Value,
    pub requested_by: String,
    pub status: TaskStatus,
    pub current_stage: Option<PipelineStage>,
    pub next_action: NextAction,
    pub retry_count: u32,
    pub approved_reasons: BTreeSet<String>,
    pub approval_queue_id: Option<String>,
    pub approval_reason: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<TaskResult>,
    pub final_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        template_type: impl Into<String>,
        input: serde_json::Value,
        requested_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::generate(),
            title: title.into(),
            template_type: template_type.into(),
            input,
            requested_by: requested_by.into(),
            status: TaskStatus::Ready,
            current_stage: None,
            next_action: NextAction::RunTask,
            retry_count: 0,
            approved_reasons: BTreeSet::new(),
            approval_queue_id: None,
            approval_reason: None,
            last_error: None,
            result: None,
            final_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}
