use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use orchestrator_core::domain::approval::{ApprovalItem, ApprovalQueueId, ApprovalStatus};
use orchestrator_core::domain::approval_action::ApprovalAction;
use orchestrator_core::domain::event::TaskEvent;
use orchestrator_core::domain::idempotency::IdempotencyRecord;
use orchestrator_core::domain::task::{Task, TaskId};

use crate::error::RepositoryError;
use crate::traits::{
    ApprovalActionRepository, ApprovalRepository, EventRepository, IdempotencyRepository,
    StateStore, TaskRepository,
};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/postgres");

/// The networked backend (spec.md §4.1): same five-table schema as
/// [`crate::sqlite::SqliteStateStore`], served from a Postgres cluster.
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect(dsn)
            .await?;

        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskRepository for PostgresStateStore {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query("SELECT payload FROM tasks WHERE task_id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_payload(&r)).transpose()
    }

    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let payload = encode_payload(task)?;
        sqlx::query(
            "INSERT INTO tasks(task_id, status, requested_by, updated_at, payload)
             VALUES($1,$2,$3,$4,$5)
             ON CONFLICT(task_id) DO UPDATE SET
               status=excluded.status,
               requested_by=excluded.requested_by,
               updated_at=excluded.updated_at,
               payload=excluded.payload",
        )
        .bind(&task.task_id.0)
        .bind(task.status.as_str())
        .bind(&task.requested_by)
        .bind(task.updated_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query("SELECT payload FROM tasks").fetch_all(&self.pool).await?;
        rows.iter().map(decode_payload).collect()
    }
}

#[async_trait]
impl EventRepository for PostgresStateStore {
    async fn append(&self, event: &TaskEvent) -> Result<(), RepositoryError> {
        let payload = encode_payload(event)?;
        sqlx::query(
            "INSERT INTO events(event_id, task_id, event_type, created_at, payload)
             VALUES($1,$2,$3,$4,$5)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(&event.event_id.0)
        .bind(&event.task_id.0)
        .bind(event.body.event_type())
        .bind(event.created_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT payload FROM events WHERE task_id = $1 ORDER BY created_at ASC, event_id ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_payload).collect()
    }

    async fn load_all(&self) -> Result<Vec<TaskEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT payload FROM events ORDER BY created_at ASC, event_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_payload).collect()
    }
}

#[async_trait]
impl ApprovalRepository for PostgresStateStore {
    async fn find_by_id(
        &self,
        id: &ApprovalQueueId,
    ) -> Result<Option<ApprovalItem>, RepositoryError> {
        let row = sqlx::query("SELECT payload FROM approvals WHERE queue_id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_payload(&r)).transpose()
    }

    async fn save(&self, item: &ApprovalItem) -> Result<(), RepositoryError> {
        let payload = encode_payload(item)?;
        let updated_at = item.resolved_at.unwrap_or(item.created_at);
        sqlx::query(
            "INSERT INTO approvals(queue_id, task_id, status, approver_group, updated_at, payload)
             VALUES($1,$2,$3,$4,$5,$6)
             ON CONFLICT(queue_id) DO UPDATE SET
               task_id=excluded.task_id,
               status=excluded.status,
               approver_group=excluded.approver_group,
               updated_at=excluded.updated_at,
               payload=excluded.payload",
        )
        .bind(&item.queue_id.0)
        .bind(&item.task_id.0)
        .bind(item.status.as_str())
        .bind(&item.approver_group)
        .bind(updated_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        status: Option<ApprovalStatus>,
        approver_group: Option<&str>,
    ) -> Result<Vec<ApprovalItem>, RepositoryError> {
        let rows = match (status, approver_group) {
            (Some(status), Some(group)) => {
                sqlx::query(
                    "SELECT payload FROM approvals WHERE status = $1 AND approver_group = $2 ORDER BY updated_at ASC",
                )
                .bind(status.as_str())
                .bind(group)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query("SELECT payload FROM approvals WHERE status = $1 ORDER BY updated_at ASC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(group)) => {
                sqlx::query(
                    "SELECT payload FROM approvals WHERE approver_group = $1 ORDER BY updated_at ASC",
                )
                .bind(group)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query("SELECT payload FROM approvals ORDER BY updated_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(decode_payload).collect()
    }

    async fn load_all(&self) -> Result<Vec<ApprovalItem>, RepositoryError> {
        let rows = sqlx::query("SELECT payload FROM approvals").fetch_all(&self.pool).await?;
        rows.iter().map(decode_payload).collect()
    }
}

#[async_trait]
impl ApprovalActionRepository for PostgresStateStore {
    async fn append(&self, action: &ApprovalAction) -> Result<(), RepositoryError> {
        let payload = encode_payload(action)?;
        sqlx::query(
            "INSERT INTO approval_actions(action_id, queue_id, task_id, action, created_at, payload)
             VALUES($1,$2,$3,$4,$5,$6)
             ON CONFLICT(action_id) DO NOTHING",
        )
        .bind(&action.action_id.0)
        .bind(&action.queue_id.0)
        .bind(&action.task_id.0)
        .bind(action.action.as_str())
        .bind(action.created_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT payload FROM approval_actions ORDER BY created_at ASC, action_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_payload).collect()
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresStateStore {
    async fn find(&self, task_id: &TaskId, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT task_ref FROM run_idempotency WHERE task_id = $1 AND idem_key = $2",
        )
        .bind(&task_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("task_ref")))
    }

    async fn save(&self, task_id: &TaskId, key: &str, task_ref: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO run_idempotency(task_id, idem_key, task_ref) VALUES($1,$2,$3)
             ON CONFLICT(task_id, idem_key) DO UPDATE SET task_ref=excluded.task_ref",
        )
        .bind(&task_id.0)
        .bind(key)
        .bind(task_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<IdempotencyRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT task_id, idem_key, task_ref FROM run_idempotency")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| IdempotencyRecord {
                task_id: TaskId(row.get::<String, _>("task_id")),
                idempotency_key: row.get::<String, _>("idem_key"),
                task_ref: TaskId(row.get::<String, _>("task_ref")),
            })
            .collect())
    }
}

impl StateStore for PostgresStateStore {}

fn encode_payload<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
) -> Result<T, RepositoryError> {
    let raw: String = row.try_get("payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}
