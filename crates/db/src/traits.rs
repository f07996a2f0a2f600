use async_trait::async_trait;

use orchestrator_core::domain::approval::{ApprovalItem, ApprovalQueueId, ApprovalStatus};
use orchestrator_core::domain::approval_action::ApprovalAction;
use orchestrator_core::domain::event::TaskEvent;
use orchestrator_core::domain::idempotency::IdempotencyRecord;
use orchestrator_core::domain::task::{Task, TaskId};

use crate::error::RepositoryError;

/// The full contents of the State Store, as handed to the in-process
/// working set on startup (spec.md §4.1 `load_state`).
#[derive(Clone, Debug, Default)]
pub struct LoadedState {
    pub tasks: Vec<Task>,
    pub events: Vec<TaskEvent>,
    pub approvals: Vec<ApprovalItem>,
    pub approval_actions: Vec<ApprovalAction>,
    pub idempotency: Vec<IdempotencyRecord>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;
    async fn load_all(&self) -> Result<Vec<Task>, RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &TaskEvent) -> Result<(), RepositoryError>;
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, RepositoryError>;
    async fn load_all(&self) -> Result<Vec<TaskEvent>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ApprovalQueueId,
    ) -> Result<Option<ApprovalItem>, RepositoryError>;
    async fn save(&self, item: &ApprovalItem) -> Result<(), RepositoryError>;
    async fn list(
        &self,
        status: Option<ApprovalStatus>,
        approver_group: Option<&str>,
    ) -> Result<Vec<ApprovalItem>, RepositoryError>;
    async fn load_all(&self) -> Result<Vec<ApprovalItem>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalActionRepository: Send + Sync {
    async fn append(&self, action: &ApprovalAction) -> Result<(), RepositoryError>;
    async fn load_all(&self) -> Result<Vec<ApprovalAction>, RepositoryError>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn find(
        &self,
        task_id: &TaskId,
        key: &str,
    ) -> Result<Option<String>, RepositoryError>;
    async fn save(&self, task_id: &TaskId, key: &str, task_ref: &str)
        -> Result<(), RepositoryError>;
    async fn load_all(&self) -> Result<Vec<IdempotencyRecord>, RepositoryError>;
}

/// The full State Store capability set (spec.md §4.1): durable persistence
/// behind a single handle, regardless of which backend is selected.
#[async_trait]
pub trait StateStore:
    TaskRepository + EventRepository + ApprovalRepository + ApprovalActionRepository + IdempotencyRepository
{
    async fn load_state(&self) -> Result<LoadedState, RepositoryError> {
        Ok(LoadedState {
            tasks: self.load_all_tasks().await?,
            events: EventRepository::load_all(self).await?,
            approvals: ApprovalRepository::load_all(self).await?,
            approval_actions: ApprovalActionRepository::load_all(self).await?,
            idempotency: IdempotencyRepository::load_all(self).await?,
        })
    }

    async fn load_all_tasks(&self) -> Result<Vec<Task>, RepositoryError> {
        TaskRepository::load_all(self).await
    }
}
