use std::sync::Arc;

use chrono::Utc;
use orchestrator_core::audit::{AuditSink, InMemoryAuditSink};
use orchestrator_core::domain::approval::ApprovalStatus;
use orchestrator_core::domain::event::EventBody;
use orchestrator_core::domain::task::TaskStatus;
use orchestrator_db::{SqliteStateStore, StateStore};
use orchestrator_server::pipeline::run_pipeline;
use orchestrator_server::store::{ApprovalDecisionKind, Store};
use orchestrator_server::templates::TemplateRegistry;
use serde_json::json;

async fn new_store() -> (Store, Arc<InMemoryAuditSink>) {
    let backend = SqliteStateStore::connect(":memory:", 1).await.expect("connect in-memory sqlite");
    let audit = Arc::new(InMemoryAuditSink::default());
    let store = Store::load(Arc::new(backend) as Arc<dyn StateStore>, audit.clone() as Arc<dyn AuditSink>)
        .await
        .expect("load store");
    (store, audit)
}

fn reports_dir() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().to_string_lossy().into_owned();
    (dir, path)
}

#[tokio::test]
async fn happy_path_runs_to_done_and_writes_a_report() {
    let (store, _audit) = new_store().await;
    let templates = TemplateRegistry::default();
    let (_tmp, reports_root) = reports_dir();

    let task = store
        .create_task(
            "weekly sync".to_string(),
            "meeting_summary".to_string(),
            json!({
                "meeting_title": "Weekly Sync",
                "meeting_date": "2026-07-29",
                "participants": ["alice", "bob"],
                "notes": "- discussed roadmap\n- agreed on Q3 scope",
            }),
            "alice".to_string(),
            Utc::now(),
        )
        .await;

    let outcome = store.run_task(&task.task_id, "alice", false, None, Utc::now()).await.expect("run");
    assert_eq!(outcome.status, TaskStatus::Running);
    assert!(outcome.dispatch);

    run_pipeline(&store, &templates, &reports_root, 1, &task.task_id).await;

    let finished = store.get_task(&task.task_id).await.expect("task present");
    assert_eq!(finished.status, TaskStatus::Done);
    let report_path = finished.result.expect("result recorded").report_path;
    assert!(tokio::fs::metadata(&report_path).await.is_ok(), "report file should exist");

    let events = store.get_events(&task.task_id).await;
    assert!(events.iter().any(|event| matches!(event.body, EventBody::TaskCreated)));
    assert!(events.iter().any(|event| matches!(
        &event.body,
        EventBody::StatusChanged { to_status, .. } if to_status == "DONE"
    )));
}

#[tokio::test]
async fn policy_block_then_approve_resumes_and_completes() {
    let (store, _audit) = new_store().await;
    let templates = TemplateRegistry::default();
    let (_tmp, reports_root) = reports_dir();

    let task = store
        .create_task(
            "outreach".to_string(),
            "meeting_summary".to_string(),
            json!({
                "meeting_title": "Client Sync",
                "meeting_date": "2026-07-29",
                "participants": ["carol"],
                "notes": "need to send externally after this",
            }),
            "carol".to_string(),
            Utc::now(),
        )
        .await;

    store.run_task(&task.task_id, "carol", false, None, Utc::now()).await.expect("run");
    run_pipeline(&store, &templates, &reports_root, 1, &task.task_id).await;

    let blocked = store.get_task(&task.task_id).await.expect("task present");
    assert_eq!(blocked.status, TaskStatus::NeedsHumanApproval);
    let queue_id = blocked.approval_queue_id.clone().expect("approval recorded");

    let pending = store.list_approvals(Some(ApprovalStatus::Pending), None).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reason_code, "external_send_requested");

    let decision = store
        .decide_approval(
            &orchestrator_core::domain::approval::ApprovalQueueId(queue_id),
            ApprovalDecisionKind::Approve,
            "manager".to_string(),
            Some("looks fine".to_string()),
            Utc::now(),
        )
        .await
        .expect("approve");
    assert_eq!(decision.task_status, TaskStatus::Running);
    assert!(decision.dispatch);

    run_pipeline(&store, &templates, &reports_root, 1, &task.task_id).await;

    let finished = store.get_task(&task.task_id).await.expect("task present");
    assert_eq!(finished.status, TaskStatus::Done);
    assert!(finished.approved_reasons.contains("external_send_requested"));
}

#[tokio::test]
async fn policy_block_then_reject_is_terminal() {
    let (store, _audit) = new_store().await;
    let templates = TemplateRegistry::default();
    let (_tmp, reports_root) = reports_dir();

    let task = store
        .create_task(
            "outreach".to_string(),
            "meeting_summary".to_string(),
            json!({
                "meeting_title": "Client Sync",
                "meeting_date": "2026-07-29",
                "participants": ["carol"],
                "notes": "send externally to the vendor",
            }),
            "carol".to_string(),
            Utc::now(),
        )
        .await;

    store.run_task(&task.task_id, "carol", false, None, Utc::now()).await.expect("run");
    run_pipeline(&store, &templates, &reports_root, 1, &task.task_id).await;

    let blocked = store.get_task(&task.task_id).await.expect("task present");
    let queue_id = blocked.approval_queue_id.clone().expect("approval recorded");

    let decision = store
        .decide_approval(
            &orchestrator_core::domain::approval::ApprovalQueueId(queue_id),
            ApprovalDecisionKind::Reject,
            "manager".to_string(),
            Some("not approved".to_string()),
            Utc::now(),
        )
        .await
        .expect("reject");
    assert_eq!(decision.task_status, TaskStatus::Done);
    assert!(!decision.dispatch);

    let finished = store.get_task(&task.task_id).await.expect("task present");
    assert_eq!(finished.status, TaskStatus::Done);
    assert_eq!(finished.final_reason.as_deref(), Some("rejected_by_human"));
    assert!(finished.completed_at.is_some());
}

#[tokio::test]
async fn retry_then_escalate_opens_a_retry_exhausted_approval() {
    let (store, _audit) = new_store().await;
    let templates = TemplateRegistry::default();
    let (_tmp, reports_root) = reports_dir();

    // `participants` as a non-array value always fails render, per
    // templates.rs's `RenderError::Failed("participants must be a list")`.
    let task = store
        .create_task(
            "broken input".to_string(),
            "meeting_summary".to_string(),
            json!({
                "meeting_title": "Broken",
                "meeting_date": "2026-07-29",
                "participants": "not-a-list",
                "notes": "one line",
            }),
            "dave".to_string(),
            Utc::now(),
        )
        .await;

    store.run_task(&task.task_id, "dave", false, None, Utc::now()).await.expect("run");
    run_pipeline(&store, &templates, &reports_root, 1, &task.task_id).await;

    let escalated = store.get_task(&task.task_id).await.expect("task present");
    assert_eq!(escalated.status, TaskStatus::NeedsHumanApproval);
    assert_eq!(escalated.retry_count, 1);
    assert_eq!(escalated.approval_reason.as_deref(), Some("retry_exhausted"));

    let pending = store.list_approvals(Some(ApprovalStatus::Pending), None).await;
    assert!(pending.iter().any(|item| item.reason_code == "retry_exhausted"));

    let events = store.get_events(&task.task_id).await;
    assert!(events.iter().any(|event| matches!(&event.body, EventBody::RetryStarted { retry_count } if *retry_count == 1)));
}

#[tokio::test]
async fn run_is_idempotent_for_a_repeated_key() {
    let (store, _audit) = new_store().await;

    let task = store
        .create_task(
            "weekly sync".to_string(),
            "meeting_summary".to_string(),
            json!({
                "meeting_title": "Weekly Sync",
                "meeting_date": "2026-07-29",
                "participants": ["alice"],
                "notes": "line one",
            }),
            "alice".to_string(),
            Utc::now(),
        )
        .await;

    let first = store
        .run_task(&task.task_id, "alice", false, Some("idem-key-1".to_string()), Utc::now())
        .await
        .expect("first run");
    assert!(first.dispatch);
    assert_eq!(first.status, TaskStatus::Running);

    let second = store
        .run_task(&task.task_id, "alice", false, Some("idem-key-1".to_string()), Utc::now())
        .await
        .expect("second run");
    assert!(!second.dispatch, "repeated idempotency key must not redispatch the pipeline");
    assert_eq!(second.status, TaskStatus::Running);

    let run_requested_events =
        store.get_events(&task.task_id).await.into_iter().filter(|event| matches!(event.body, EventBody::RunRequested { .. })).count();
    assert_eq!(run_requested_events, 1);
}
