use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

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

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

/// The embedded default backend (spec.md §4.1): a single SQLite file,
/// created (with its parent directory) on first use.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(database_path: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        if database_path != ":memory:" && !database_path.starts_with("sqlite::memory:") {
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let url = to_connect_url(database_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, RepositoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }
}

fn to_connect_url(database_path: &str) -> String {
    if database_path == ":memory:" {
        "sqlite::memory:".to_string()
    } else if database_path.starts_with("sqlite:") {
        database_path.to_string()
    } else {
        format!("sqlite://{database_path}?mode=rwc")
    }
}

#[async_trait]
impl TaskRepository for SqliteStateStore {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query("SELECT payload FROM tasks WHERE task_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_payload(&r)).transpose()
    }

    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let payload = encode_payload(task)?;
        sqlx::query(
            "INSERT INTO tasks(task_id, status, requested_by, updated_at, payload)
             VALUES(?,?,?,?,?)
             ON CONFLICT(task_id) DO UPDATE SET
               status=excluded.status,
               requested_by=excluded.requested_by,
               updated_at=excluded.updated_at,
               payload=excluded.payload",
        )
        .bind(&task.task_id.0)
        .bind(task.status.as_str())
        .bind(&task.requested_by)
        .bind(task.updated_at.to_rfc3339())
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
impl EventRepository for SqliteStateStore {
    async fn append(&self, event: &TaskEvent) -> Result<(), RepositoryError> {
        let payload = encode_payload(event)?;
        sqlx::query(
            "INSERT OR REPLACE INTO events(event_id, task_id, event_type, created_at, payload)
             VALUES(?,?,?,?,?)",
        )
        .bind(&event.event_id.0)
        .bind(&event.task_id.0)
        .bind(event.body.event_type())
        .bind(event.created_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT payload FROM events WHERE task_id = ? ORDER BY created_at ASC, event_id ASC",
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
impl ApprovalRepository for SqliteStateStore {
    async fn find_by_id(
        &self,
        id: &ApprovalQueueId,
    ) -> Result<Option<ApprovalItem>, RepositoryError> {
        let row = sqlx::query("SELECT payload FROM approvals WHERE queue_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_payload(&r)).transpose()
    }

    async fn save(&self, item: &ApprovalItem) -> Result<(), RepositoryError> {
        let payload = encode_payload(item)?;
        let updated_at = item.resolved_at.unwrap_or(item.created_at).to_rfc3339();
        sqlx::query(
            "INSERT INTO approvals(queue_id, task_id, status, approver_group, updated_at, payload)
             VALUES(?,?,?,?,?,?)
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
                    "SELECT payload FROM approvals WHERE status = ? AND approver_group = ? ORDER BY updated_at ASC",
                )
                .bind(status.as_str())
                .bind(group)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query("SELECT payload FROM approvals WHERE status = ? ORDER BY updated_at ASC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(group)) => {
                sqlx::query(
                    "SELECT payload FROM approvals WHERE approver_group = ? ORDER BY updated_at ASC",
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
impl ApprovalActionRepository for SqliteStateStore {
    async fn append(&self, action: &ApprovalAction) -> Result<(), RepositoryError> {
        let payload = encode_payload(action)?;
        sqlx::query(
            "INSERT OR REPLACE INTO approval_actions(action_id, queue_id, task_id, action, created_at, payload)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(&action.action_id.0)
        .bind(&action.queue_id.0)
        .bind(&action.task_id.0)
        .bind(action.action.as_str())
        .bind(action.created_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let rows = sqlx::query("SELECT payload FROM approval_actions ORDER BY created_at ASC, action_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_payload).collect()
    }
}

#[async_trait]
impl IdempotencyRepository for SqliteStateStore {
    async fn find(&self, task_id: &TaskId, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT task_ref FROM run_idempotency WHERE task_id = ? AND idem_key = ?",
        )
        .bind(&task_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("task_ref")))
    }

    async fn save(&self, task_id: &TaskId, key: &str, task_ref: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO run_idempotency(task_id, idem_key, task_ref) VALUES(?,?,?)",
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

impl StateStore for SqliteStateStore {}

fn encode_payload<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<T, RepositoryError> {
    let raw: String = row.try_get("payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use orchestrator_core::domain::approval::ApprovalItem;
    use orchestrator_core::domain::approval_action::{ApprovalAction, ApprovalActionKind};
    use orchestrator_core::domain::event::TaskEvent;
    use orchestrator_core::domain::task::{Task, TaskId};

    use super::*;
    use crate::traits::{ApprovalActionRepository, ApprovalRepository, EventRepository, IdempotencyRepository, StateStore, TaskRepository};

    fn sample_task() -> Task {
        Task::new(
            "Summarize standup",
            "meeting_summary",
            serde_json::json!({"notes": "line one"}),
            "alice",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_and_find_task_round_trips() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let task = sample_task();
        store.save(&task).await.expect("save");

        let found = store.find_by_id(&task.task_id).await.expect("find").expect("present");
        assert_eq!(found.task_id, task.task_id);
        assert_eq!(found.title, "Summarize standup");
    }

    #[tokio::test]
    async fn save_upserts_existing_task() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let mut task = sample_task();
        store.save(&task).await.expect("save");

        task.retry_count = 2;
        store.save(&task).await.expect("upsert");

        let found = store.find_by_id(&task.task_id).await.expect("find").expect("present");
        assert_eq!(found.retry_count, 2);
    }

    #[tokio::test]
    async fn events_list_for_task_in_creation_order() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let task = sample_task();
        store.save(&task).await.expect("save");

        let first = TaskEvent::new(
            task.task_id.clone(),
            orchestrator_core::domain::event::EventBody::TaskCreated,
            Utc::now(),
        );
        store.append(&first).await.expect("append 1");
        let second = TaskEvent::new(
            task.task_id.clone(),
            orchestrator_core::domain::event::EventBody::StatusChanged {
                from_status: "READY".to_string(),
                to_status: "RUNNING".to_string(),
                reason_code: None,
            },
            Utc::now(),
        );
        store.append(&second).await.expect("append 2");

        let events = EventRepository::list_for_task(&store, &task.task_id).await.expect("list");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn approval_list_filters_by_status_and_group() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let task = sample_task();
        store.save(&task).await.expect("save task");

        let item = ApprovalItem::new(task.task_id.clone(), "external_send_requested", "alice", Utc::now());
        store.save(&item).await.expect("save approval");

        let pending = store
            .list(Some(orchestrator_core::domain::approval::ApprovalStatus::Pending), None)
            .await
            .expect("list pending");
        assert_eq!(pending.len(), 1);

        let wrong_group = store.list(None, Some("not_a_real_group")).await.expect("list group");
        assert!(wrong_group.is_empty());
    }

    #[tokio::test]
    async fn approval_action_and_idempotency_round_trip() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let task = sample_task();
        store.save(&task).await.expect("save task");

        let item = ApprovalItem::new(task.task_id.clone(), "external_send_requested", "alice", Utc::now());
        let action = ApprovalAction::new(
            item.queue_id.clone(),
            task.task_id.clone(),
            ApprovalActionKind::Approve,
            "bob",
            None,
            Utc::now(),
        );
        store.append(&action).await.expect("append action");
        let actions = ApprovalActionRepository::load_all(&store).await.expect("load actions");
        assert_eq!(actions.len(), 1);

        store.save(&task.task_id, "idem-key-1", &task.task_id.0).await.expect("save idem");
        let found = store.find(&task.task_id, "idem-key-1").await.expect("find idem");
        assert_eq!(found.as_deref(), Some(task.task_id.0.as_str()));

        let _ = BTreeSet::<String>::new();
    }

    #[tokio::test]
    async fn load_state_aggregates_every_table() {
        let store = SqliteStateStore::connect_in_memory().await.expect("connect");
        let task = sample_task();
        store.save(&task).await.expect("save task");

        let loaded = StateStore::load_state(&store).await.expect("load state");
        assert_eq!(loaded.tasks.len(), 1);
        assert!(loaded.events.is_empty());
    }
}
