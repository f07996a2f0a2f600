use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::task::TaskStatus;
use crate::flows::states::{TaskEvent, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TaskStatus, event: TaskEvent },
}

/// Pure state machine over the task lifecycle, per spec.md §4.5:
///
/// ```text
/// READY ──run──▶ RUNNING
/// RUNNING ──policy_blocked──▶ NEEDS_HUMAN_APPROVAL
/// RUNNING ──exception (retries left)──▶ FAILED_RETRYABLE ──auto──▶ RUNNING
/// RUNNING ──exception (retries exhausted)──▶ NEEDS_HUMAN_APPROVAL
/// RUNNING ──success──▶ DONE
/// NEEDS_HUMAN_APPROVAL ──approve──▶ RUNNING
/// NEEDS_HUMAN_APPROVAL ──reject──▶ DONE
/// ```
pub fn transition(
    current: TaskStatus,
    event: TaskEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TaskEvent::{Approve, AutoRetry, ExceptionExhausted, ExceptionRetry, PolicyBlocked, Reject, Run, Success};
    use TaskStatus::{Done, FailedRetryable, NeedsHumanApproval, Ready, Running};

    let to = match (current, event) {
        (Ready, Run) => Running,
        (Running, PolicyBlocked) => NeedsHumanApproval,
        (Running, ExceptionRetry) => FailedRetryable,
        (FailedRetryable, AutoRetry) => Running,
        (Running, ExceptionExhausted) => NeedsHumanApproval,
        (Running, Success) => Done,
        (NeedsHumanApproval, Approve) => Running,
        (NeedsHumanApproval, Reject) => Done,
        (state, event) => return Err(FlowTransitionError::InvalidTransition { state, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

/// Applies `transition` while emitting an audit event for the attempt,
/// whichever way it resolves. Mirrors the audited-apply shape used
/// throughout this codebase's lifecycle layer.
pub fn transition_with_audit<S>(
    current: TaskStatus,
    event: TaskEvent,
    sink: &S,
    audit: &AuditContext,
) -> Result<TransitionOutcome, FlowTransitionError>
where
    S: AuditSink,
{
    let result = transition(current, event);
    match &result {
        Ok(outcome) => {
            sink.emit(
                AuditEvent::new(
                    audit.task_id.clone(),
                    audit.correlation_id.clone(),
                    "lifecycle.transition_applied",
                    AuditCategory::Lifecycle,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str()),
            );
        }
        Err(error) => {
            sink.emit(
                AuditEvent::new(
                    audit.task_id.clone(),
                    audit.correlation_id.clone(),
                    "lifecycle.transition_rejected",
                    AuditCategory::Lifecycle,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use crate::audit::InMemoryAuditSink;
    use crate::domain::task::{TaskId, TaskStatus};
    use crate::flows::engine::{transition, transition_with_audit, FlowTransitionError};
    use crate::flows::states::TaskEvent;

    #[test]
    fn happy_path_runs_to_completion() {
        let running = transition(TaskStatus::Ready, TaskEvent::Run).expect("ready -> running").to;
        assert_eq!(running, TaskStatus::Running);

        let done = transition(running, TaskEvent::Success).expect("running -> done").to;
        assert_eq!(done, TaskStatus::Done);
    }

    #[test]
    fn policy_block_then_approve_re_enters_running() {
        let blocked = transition(TaskStatus::Running, TaskEvent::PolicyBlocked)
            .expect("running -> needs_human_approval")
            .to;
        assert_eq!(blocked, TaskStatus::NeedsHumanApproval);

        let resumed =
            transition(blocked, TaskEvent::Approve).expect("needs_human_approval -> running").to;
        assert_eq!(resumed, TaskStatus::Running);
    }

    #[test]
    fn reject_is_terminal() {
        let done = transition(TaskStatus::NeedsHumanApproval, TaskEvent::Reject)
            .expect("needs_human_approval -> done")
            .to;
        assert_eq!(done, TaskStatus::Done);
    }

    #[test]
    fn retry_loop_returns_to_running_via_auto_edge() {
        let failed = transition(TaskStatus::Running, TaskEvent::ExceptionRetry)
            .expect("running -> failed_retryable")
            .to;
        assert_eq!(failed, TaskStatus::FailedRetryable);

        let resumed =
            transition(failed, TaskEvent::AutoRetry).expect("failed_retryable -> running").to;
        assert_eq!(resumed, TaskStatus::Running);
    }

    #[test]
    fn retry_exhaustion_escalates_to_approval() {
        let blocked = transition(TaskStatus::Running, TaskEvent::ExceptionExhausted)
            .expect("running -> needs_human_approval")
            .to;
        assert_eq!(blocked, TaskStatus::NeedsHumanApproval);
    }

    #[test]
    fn done_is_terminal_no_transition_out() {
        let error = transition(TaskStatus::Done, TaskEvent::Run).expect_err("done is terminal");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition { state: TaskStatus::Done, event: TaskEvent::Run }
        ));
    }

    #[test]
    fn re_running_a_non_ready_task_is_rejected() {
        let error =
            transition(TaskStatus::Running, TaskEvent::Run).expect_err("already running");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn transition_emits_audit_event() {
        let sink = InMemoryAuditSink::default();
        let _ = transition_with_audit(
            TaskStatus::Ready,
            TaskEvent::Run,
            &sink,
            &crate::audit::AuditContext::new(
                Some(TaskId("task_abc".to_owned())),
                "req-42",
                "pipeline-executor",
            ),
        )
        .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "lifecycle.transition_applied");
    }
}
