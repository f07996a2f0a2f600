use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use orchestrator_core::domain::approval::{ApprovalItem, ApprovalQueueId, ApprovalStatus};
use orchestrator_core::domain::approval_action::ApprovalAction;
use orchestrator_core::domain::event::{EventBody, TaskEvent as LogEvent};
use orchestrator_core::domain::task::{NextAction, PipelineStage, Task, TaskId, TaskResult, TaskStatus};
use orchestrator_core::errors::{ApplicationError, DomainError};
use orchestrator_core::flows::{transition, TaskEvent as FlowEvent};
use orchestrator_core::{approval_queue, PolicyPatternRegistry};
use orchestrator_db::{
    ApprovalActionRepository, ApprovalRepository, EventRepository, IdempotencyRepository,
    RepositoryError, StateStore, TaskRepository,
};
use serde::Serialize;

/// The owned working set per spec.md §9: every in-memory map the original
/// kept as module-level globals, collected under one lock. All reads and
/// writes to tasks/events/approvals/actions/idempotency pass through here.
#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    events: Vec<LogEvent>,
    approvals: HashMap<ApprovalQueueId, ApprovalItem>,
    approval_actions: Vec<ApprovalAction>,
    idempotency: HashMap<(TaskId, String), TaskId>,
}

pub struct Store {
    state: tokio::sync::Mutex<StoreState>,
    backend: Arc<dyn StateStore>,
    policy: PolicyPatternRegistry,
    audit: Arc<dyn AuditSink>,
}

pub struct RunOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub dispatch: bool,
}

pub enum ApprovalDecisionKind {
    Approve,
    Reject,
}

pub struct ApprovalDecisionResult {
    pub task_id: TaskId,
    pub approval: ApprovalItem,
    pub task_status: TaskStatus,
    pub dispatch: bool,
}

pub enum StageAdvance {
    Proceed(Task),
    Skip,
}

pub enum PolicyOutcome {
    Blocked,
    Clear(Task),
}

pub enum RetryDecision {
    Retrying,
    Escalated,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub total_events: usize,
    pub blocked_policy_events: usize,
    pub policy_bypass_events: usize,
    pub approvals_pending: usize,
    pub approvals_resolved: usize,
}

impl Store {
    pub async fn load(backend: Arc<dyn StateStore>, audit: Arc<dyn AuditSink>) -> Result<Self, RepositoryError> {
        let loaded = backend.load_state().await?;
        let mut state = StoreState::default();
        for task in loaded.tasks {
            state.tasks.insert(task.task_id.clone(), task);
        }
        state.events = loaded.events;
        for approval in loaded.approvals {
            state.approvals.insert(approval.queue_id.clone(), approval);
        }
        state.approval_actions = loaded.approval_actions;
        for record in loaded.idempotency {
            state.idempotency.insert((record.task_id.clone(), record.idempotency_key), record.task_ref);
        }

        Ok(Self { state: tokio::sync::Mutex::new(state), backend, policy: PolicyPatternRegistry::baseline(), audit })
    }

    fn emit_audit(
        &self,
        task_id: Option<TaskId>,
        event_type: &str,
        category: AuditCategory,
        actor: &str,
        outcome: AuditOutcome,
    ) {
        self.audit.emit(AuditEvent::new(task_id, "store", event_type, category, actor, outcome));
    }

    pub async fn create_task(
        &self,
        title: String,
        template_type: String,
        input: serde_json::Value,
        requested_by: String,
        now: DateTime<Utc>,
    ) -> Task {
        let task = Task::new(title, template_type, input, requested_by, now);
        let event = LogEvent::new(task.task_id.clone(), EventBody::TaskCreated, now);

        let mut guard = self.state.lock().await;
        guard.tasks.insert(task.task_id.clone(), task.clone());
        guard.events.push(event.clone());

        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &task).await {
            tracing::error!(error = %err, task_id = %task.task_id.0, "failed to persist created task");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &event).await {
            tracing::error!(error = %err, task_id = %task.task_id.0, "failed to persist task-created event");
        }

        self.emit_audit(
            Some(task.task_id.clone()),
            "ingress.task_created",
            AuditCategory::Ingress,
            &task.requested_by,
            AuditOutcome::Success,
        );

        task
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        let guard = self.state.lock().await;
        guard.tasks.get(task_id).cloned()
    }

    pub async fn get_events(&self, task_id: &TaskId) -> Vec<LogEvent> {
        let guard = self.state.lock().await;
        guard.events.iter().filter(|event| &event.task_id == task_id).cloned().collect()
    }

    pub async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        approver_group: Option<&str>,
    ) -> Vec<ApprovalItem> {
        let guard = self.state.lock().await;
        guard
            .approvals
            .values()
            .filter(|item| status.map(|wanted| item.status == wanted).unwrap_or(true))
            .filter(|item| approver_group.map(|group| item.approver_group == group).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn get_approval(&self, queue_id: &ApprovalQueueId) -> Option<ApprovalItem> {
        let guard = self.state.lock().await;
        guard.approvals.get(queue_id).cloned()
    }

    pub async fn audit_summary(&self) -> AuditSummary {
        let guard = self.state.lock().await;
        let blocked_policy_events = guard.events.iter().filter(|event| event.body.is_blocked_policy()).count();
        let approvals_pending =
            guard.approvals.values().filter(|item| item.status == ApprovalStatus::Pending).count();
        let approvals_resolved = guard
            .approvals
            .values()
            .filter(|item| matches!(item.status, ApprovalStatus::Approved | ApprovalStatus::Rejected))
            .count();

        AuditSummary {
            total_events: guard.events.len(),
            blocked_policy_events,
            policy_bypass_events: 0,
            approvals_pending,
            approvals_resolved,
        }
    }

    /// Handles `/task/run`, including the idempotency short-circuit: if
    /// `idempotency_key` is already recorded for this task, returns the
    /// current status without a new READY -> RUNNING transition.
    pub async fn run_task(
        &self,
        task_id: &TaskId,
        actor_id: &str,
        actor_is_admin: bool,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, ApplicationError> {
        let mut guard = self.state.lock().await;
        let Some(task) = guard.tasks.get(task_id).cloned() else {
            return Err(ApplicationError::TaskNotFound(task_id.0.clone()));
        };

        if !actor_is_admin && task.requested_by != actor_id {
            return Err(ApplicationError::Forbidden("requester can only access their own task".to_string()));
        }

        if let Some(key) = idempotency_key.as_ref() {
            if guard.idempotency.contains_key(&(task_id.clone(), key.clone())) {
                drop(guard);
                self.emit_audit(
                    Some(task_id.clone()),
                    "ingress.run_deduplicated",
                    AuditCategory::Ingress,
                    actor_id,
                    AuditOutcome::Success,
                );
                return Ok(RunOutcome {
                    task_id: task_id.clone(),
                    status: task.status,
                    started_at: task.started_at,
                    dispatch: false,
                });
            }
        }

        if task.status != TaskStatus::Ready {
            return Err(ApplicationError::InvalidTaskState(format!(
                "task is not READY: {}",
                task.status.as_str()
            )));
        }

        let outcome = transition(task.status, FlowEvent::Run)
            .map_err(|err| ApplicationError::Domain(DomainError::FlowTransition(err)))?;

        let mut updated = task.clone();
        updated.started_at = Some(now);
        updated.status = outcome.to;
        updated.next_action = NextAction::WaitForCompletion;
        updated.updated_at = now;
        guard.tasks.insert(task_id.clone(), updated.clone());

        let status_event = LogEvent::new(
            task_id.clone(),
            EventBody::StatusChanged {
                from_status: outcome.from.as_str().to_string(),
                to_status: outcome.to.as_str().to_string(),
                reason_code: None,
            },
            now,
        );
        guard.events.push(status_event.clone());

        let run_event =
            LogEvent::new(task_id.clone(), EventBody::RunRequested { idempotency_key: idempotency_key.clone() }, now);
        guard.events.push(run_event.clone());

        if let Some(key) = idempotency_key.clone() {
            guard.idempotency.insert((task_id.clone(), key), task_id.clone());
        }

        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &updated).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist running task");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &status_event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist status-changed event");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &run_event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist run-requested event");
        }
        if let Some(key) = idempotency_key {
            if let Err(err) = IdempotencyRepository::save(self.backend.as_ref(), task_id, &key, &task_id.0).await {
                tracing::error!(error = %err, task_id = %task_id.0, "failed to persist idempotency record");
            }
        }

        Ok(RunOutcome { task_id: task_id.clone(), status: updated.status, started_at: updated.started_at, dispatch: true })
    }

    pub async fn decide_approval(
        &self,
        queue_id: &ApprovalQueueId,
        kind: ApprovalDecisionKind,
        acted_by: String,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalDecisionResult, ApplicationError> {
        let mut guard = self.state.lock().await;
        let Some(item) = guard.approvals.get(queue_id).cloned() else {
            return Err(ApplicationError::ApprovalNotFound(queue_id.0.clone()));
        };

        let decision = match kind {
            ApprovalDecisionKind::Approve => approval_queue::decide_approve(item, acted_by, comment, now),
            ApprovalDecisionKind::Reject => approval_queue::decide_reject(item, acted_by, comment, now),
        }
        .map_err(|err| ApplicationError::InvalidApprovalState(err.to_string()))?;

        guard.approvals.insert(queue_id.clone(), decision.approval.clone());
        guard.approval_actions.push(decision.action.clone());

        if let Err(err) = ApprovalRepository::save(self.backend.as_ref(), &decision.approval).await {
            tracing::error!(error = %err, queue_id = %queue_id.0, "failed to persist approval decision");
        }
        if let Err(err) = ApprovalActionRepository::append(self.backend.as_ref(), &decision.action).await {
            tracing::error!(error = %err, queue_id = %queue_id.0, "failed to persist approval action");
        }

        let task_id = decision.approval.task_id.clone();
        let Some(task) = guard.tasks.get(&task_id).cloned() else {
            return Err(ApplicationError::TaskNotFound(task_id.0.clone()));
        };

        let (flow_event, dispatch) = match kind {
            ApprovalDecisionKind::Approve => (FlowEvent::Approve, true),
            ApprovalDecisionKind::Reject => (FlowEvent::Reject, false),
        };

        let flow_outcome = transition(task.status, flow_event)
            .map_err(|err| ApplicationError::Domain(DomainError::FlowTransition(err)))?;

        let mut updated = task.clone();
        updated.status = flow_outcome.to;
        updated.updated_at = now;

        let decision_event = match kind {
            ApprovalDecisionKind::Approve => {
                updated.approved_reasons.insert(decision.approval.reason_code.clone());
                updated.next_action = NextAction::WaitForCompletion;
                LogEvent::new(
                    task_id.clone(),
                    EventBody::HumanApproved { queue_id: queue_id.0.clone(), acted_by: decision.action.acted_by.clone() },
                    now,
                )
            }
            ApprovalDecisionKind::Reject => {
                updated.next_action = NextAction::None;
                updated.final_reason = Some("rejected_by_human".to_string());
                updated.completed_at = Some(now);
                LogEvent::new(
                    task_id.clone(),
                    EventBody::HumanRejected { queue_id: queue_id.0.clone(), acted_by: decision.action.acted_by.clone() },
                    now,
                )
            }
        };

        guard.tasks.insert(task_id.clone(), updated.clone());
        guard.events.push(decision_event.clone());

        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &updated).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist task after approval decision");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &decision_event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist approval decision event");
        }

        self.emit_audit(
            Some(task_id.clone()),
            match kind {
                ApprovalDecisionKind::Approve => "approval.approved",
                ApprovalDecisionKind::Reject => "approval.rejected",
            },
            AuditCategory::Approval,
            &decision.action.acted_by,
            AuditOutcome::Success,
        );

        Ok(ApprovalDecisionResult {
            task_id,
            approval: decision.approval,
            task_status: updated.status,
            dispatch,
        })
    }

    /// Planner/executor stage entry: moves the task's `current_stage`
    /// forward and persists it, or reports that the task is no longer
    /// RUNNING (concurrent rejection, restart, etc.) so the caller can stop.
    pub async fn begin_stage(&self, task_id: &TaskId, stage: PipelineStage) -> StageAdvance {
        let mut guard = self.state.lock().await;
        let Some(task) = guard.tasks.get(task_id).cloned() else {
            return StageAdvance::Skip;
        };
        if task.status != TaskStatus::Running {
            return StageAdvance::Skip;
        }

        let now = Utc::now();
        let mut updated = task;
        updated.current_stage = Some(stage);
        updated.updated_at = now;
        guard.tasks.insert(task_id.clone(), updated.clone());

        let event = LogEvent::new(task_id.clone(), EventBody::StageChanged { stage: stage.as_str().to_string() }, now);
        guard.events.push(event.clone());

        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &updated).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist stage change");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist stage-changed event");
        }

        StageAdvance::Proceed(updated)
    }

    /// Executor stage: checks the policy detector against the task's input
    /// and, if blocked, opens an approval item and transitions the task to
    /// NEEDS_HUMAN_APPROVAL. Returns the task snapshot to render when clear.
    pub async fn evaluate_policy(&self, task_id: &TaskId) -> PolicyOutcome {
        let task = match self.begin_stage(task_id, PipelineStage::Executor).await {
            StageAdvance::Skip => return PolicyOutcome::Blocked,
            StageAdvance::Proceed(task) => task,
        };

        let Some(reason_code) = self.policy.detect(&task.input, &task.approved_reasons) else {
            return PolicyOutcome::Clear(task);
        };

        let mut guard = self.state.lock().await;
        let now = Utc::now();

        let blocked_event =
            LogEvent::new(task_id.clone(), EventBody::BlockedPolicy { reason_code: reason_code.clone() }, now);
        guard.events.push(blocked_event.clone());
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &blocked_event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist blocked-policy event");
        }

        let approval = ApprovalItem::new(task_id.clone(), reason_code.clone(), task.requested_by.clone(), now);
        guard.approvals.insert(approval.queue_id.clone(), approval.clone());
        if let Err(err) = ApprovalRepository::save(self.backend.as_ref(), &approval).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist approval item");
        }

        let approval_event = LogEvent::new(
            task_id.clone(),
            EventBody::ApprovalRequested { queue_id: approval.queue_id.0.clone(), reason_code: reason_code.clone() },
            now,
        );
        guard.events.push(approval_event.clone());
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &approval_event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist approval-requested event");
        }

        if let Ok(flow_outcome) = transition(task.status, FlowEvent::PolicyBlocked) {
            let mut updated = task;
            updated.status = flow_outcome.to;
            updated.approval_reason = Some(reason_code.clone());
            updated.approval_queue_id = Some(approval.queue_id.0.clone());
            updated.next_action = NextAction::ApproveOrReject;
            updated.updated_at = now;
            guard.tasks.insert(task_id.clone(), updated.clone());

            let status_event = LogEvent::new(
                task_id.clone(),
                EventBody::StatusChanged {
                    from_status: flow_outcome.from.as_str().to_string(),
                    to_status: flow_outcome.to.as_str().to_string(),
                    reason_code: Some(reason_code),
                },
                now,
            );
            guard.events.push(status_event.clone());

            if let Err(err) = TaskRepository::save(self.backend.as_ref(), &updated).await {
                tracing::error!(error = %err, task_id = %task_id.0, "failed to persist policy-blocked task");
            }
            if let Err(err) = EventRepository::append(self.backend.as_ref(), &status_event).await {
                tracing::error!(error = %err, task_id = %task_id.0, "failed to persist status-changed event");
            }
        }

        PolicyOutcome::Blocked
    }

    /// Reporter stage: records the artifact and transitions the task to
    /// DONE. The reviewer check, rendering, and the report file write all
    /// happen outside the lock, before this is called.
    pub async fn finalize_success(&self, task_id: &TaskId, report_path: String) -> Result<(), String> {
        if let StageAdvance::Skip = self.begin_stage(task_id, PipelineStage::Reporter).await {
            return Ok(());
        }

        let mut guard = self.state.lock().await;
        let Some(task) = guard.tasks.get(task_id).cloned() else {
            return Ok(());
        };
        if task.status != TaskStatus::Running {
            return Ok(());
        }

        let flow_outcome = transition(task.status, FlowEvent::Success).map_err(|err| err.to_string())?;
        let now = Utc::now();

        let mut updated = task;
        updated.status = flow_outcome.to;
        updated.result = Some(TaskResult { report_path });
        updated.completed_at = Some(now);
        updated.next_action = NextAction::None;
        updated.updated_at = now;
        guard.tasks.insert(task_id.clone(), updated.clone());

        let event = LogEvent::new(
            task_id.clone(),
            EventBody::StatusChanged {
                from_status: flow_outcome.from.as_str().to_string(),
                to_status: flow_outcome.to.as_str().to_string(),
                reason_code: None,
            },
            now,
        );
        guard.events.push(event.clone());

        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &updated).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist completed task");
        }
        if let Err(err) = EventRepository::append(self.backend.as_ref(), &event).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist completion event");
        }

        Ok(())
    }

    /// Retry-then-escalate loop (spec.md §4.5 / §9): on a stage failure,
    /// either loops the task back through FAILED_RETRYABLE -> RUNNING, or,
    /// once `max_retry` is exhausted, opens a `retry_exhausted` approval.
    pub async fn record_failure_and_retry_or_escalate(
        &self,
        task_id: &TaskId,
        message: String,
        max_retry: u32,
    ) -> RetryDecision {
        let mut guard = self.state.lock().await;
        let Some(task) = guard.tasks.get(task_id).cloned() else {
            return RetryDecision::Escalated;
        };
        if task.status != TaskStatus::Running {
            return RetryDecision::Escalated;
        }

        let now = Utc::now();

        if task.retry_count < max_retry {
            let Ok(retry_outcome) = transition(task.status, FlowEvent::ExceptionRetry) else {
                return RetryDecision::Escalated;
            };

            let mut retrying = task.clone();
            retrying.status = retry_outcome.to;
            retrying.retry_count += 1;
            retrying.last_error = Some(message);
            retrying.next_action = NextAction::Retrying;
            retrying.updated_at = now;
            guard.tasks.insert(task_id.clone(), retrying.clone());

            let status_event = LogEvent::new(
                task_id.clone(),
                EventBody::StatusChanged {
                    from_status: retry_outcome.from.as_str().to_string(),
                    to_status: retry_outcome.to.as_str().to_string(),
                    reason_code: None,
                },
                now,
            );
            guard.events.push(status_event.clone());

            let retry_event =
                LogEvent::new(task_id.clone(), EventBody::RetryStarted { retry_count: retrying.retry_count }, now);
            guard.events.push(retry_event.clone());

            let resume_outcome = transition(retrying.status, FlowEvent::AutoRetry)
                .expect("failed_retryable always re-enters running");
            let mut resumed = retrying;
            resumed.status = resume_outcome.to;
            resumed.next_action = NextAction::WaitForCompletion;
            resumed.updated_at = now;
            guard.tasks.insert(task_id.clone(), resumed.clone());

            let resume_event = LogEvent::new(
                task_id.clone(),
                EventBody::StatusChanged {
                    from_status: resume_outcome.from.as_str().to_string(),
                    to_status: resume_outcome.to.as_str().to_string(),
                    reason_code: None,
                },
                now,
            );
            guard.events.push(resume_event.clone());

            if let Err(err) = TaskRepository::save(self.backend.as_ref(), &resumed).await {
                tracing::error!(error = %err, task_id = %task_id.0, "failed to persist retry state");
            }
            for event in [&status_event, &retry_event, &resume_event] {
                if let Err(err) = EventRepository::append(self.backend.as_ref(), event).await {
                    tracing::error!(error = %err, task_id = %task_id.0, "failed to persist retry event");
                }
            }

            return RetryDecision::Retrying;
        }

        let Ok(flow_outcome) = transition(task.status, FlowEvent::ExceptionExhausted) else {
            return RetryDecision::Escalated;
        };

        let approval = ApprovalItem::new(task_id.clone(), "retry_exhausted", task.requested_by.clone(), now);
        guard.approvals.insert(approval.queue_id.clone(), approval.clone());

        let mut escalated = task;
        escalated.status = flow_outcome.to;
        escalated.approval_reason = Some("retry_exhausted".to_string());
        escalated.approval_queue_id = Some(approval.queue_id.0.clone());
        escalated.last_error = Some(message);
        escalated.next_action = NextAction::ApproveOrReject;
        escalated.updated_at = now;
        guard.tasks.insert(task_id.clone(), escalated.clone());

        let approval_event = LogEvent::new(
            task_id.clone(),
            EventBody::ApprovalRequested {
                queue_id: approval.queue_id.0.clone(),
                reason_code: "retry_exhausted".to_string(),
            },
            now,
        );
        guard.events.push(approval_event.clone());

        let status_event = LogEvent::new(
            task_id.clone(),
            EventBody::StatusChanged {
                from_status: flow_outcome.from.as_str().to_string(),
                to_status: flow_outcome.to.as_str().to_string(),
                reason_code: Some("retry_exhausted".to_string()),
            },
            now,
        );
        guard.events.push(status_event.clone());

        if let Err(err) = ApprovalRepository::save(self.backend.as_ref(), &approval).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist escalation approval");
        }
        if let Err(err) = TaskRepository::save(self.backend.as_ref(), &escalated).await {
            tracing::error!(error = %err, task_id = %task_id.0, "failed to persist escalated task");
        }
        for event in [&approval_event, &status_event] {
            if let Err(err) = EventRepository::append(self.backend.as_ref(), event).await {
                tracing::error!(error = %err, task_id = %task_id.0, "failed to persist escalation event");
            }
        }

        RetryDecision::Escalated
    }
}
