// Re-export chrono for downstream crates that need DateTime types
pub use chrono;

pub mod approval_queue;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod policy;

pub use approval_queue::{decide_approve, decide_reject, ApprovalDecisionOutcome, ApprovalQueueError};
pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, AuthMode, Backend, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{ApprovalItem, ApprovalQueueId, ApprovalStatus};
pub use domain::approval_action::{ApprovalAction, ApprovalActionId, ApprovalActionKind};
pub use domain::event::{EventBody, EventId, TaskEvent as DomainTaskEvent};
pub use domain::idempotency::IdempotencyRecord;
pub use domain::task::{
    NextAction, PipelineStage, Task, TaskId, TaskResult, TaskStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{transition, transition_with_audit, FlowTransitionError, TaskEvent, TransitionOutcome};
pub use policy::PolicyPatternRegistry;
