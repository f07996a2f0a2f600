use orchestrator_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Mirrors the durable event log to the process log stream via `tracing`,
/// matching the structured-field convention used throughout this codebase
/// (`event_name`, `correlation_id`, `task_id`).
#[derive(Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let task_id = event.task_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none");
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                task_id = %task_id,
                actor = %event.actor,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                task_id = %task_id,
                actor = %event.actor,
                "audit event"
            ),
        }
    }
}
