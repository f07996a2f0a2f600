use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use orchestrator_core::domain::approval::{ApprovalItem, ApprovalQueueId, ApprovalStatus};
use orchestrator_core::domain::event::TaskEvent;
use orchestrator_core::domain::task::{Task, TaskId};
use orchestrator_core::errors::ApplicationError;
use serde::{Deserialize, Serialize};

use crate::auth::{ActorContext, Role};
use crate::bootstrap::AppState;
use crate::error::ApiError;
use crate::pipeline;
use crate::store::{ApprovalDecisionKind, AuditSummary};

/// The 8 thin HTTP handlers of spec.md §6: validate input, authorize the
/// actor, mutate state under the Store's single exclusion lock, persist,
/// and — for `run` and `approve` — hand off to the pipeline executor.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/task/create", post(create_task))
        .route("/api/v1/task/run", post(run_task))
        .route("/api/v1/task/status/{id}", get(task_status))
        .route("/api/v1/task/events/{id}", get(task_events))
        .route("/api/v1/approvals", get(list_approvals))
        .route("/api/v1/approvals/{id}/approve", post(approve_item))
        .route("/api/v1/approvals/{id}/reject", post(reject_item))
        .route("/api/v1/audit/summary", get(audit_summary))
}

fn dispatch_pipeline(state: &AppState, task_id: TaskId) {
    pipeline::spawn_pipeline(
        state.store.clone(),
        state.templates.clone(),
        state.config.reports.root.clone(),
        state.config.pipeline.max_retry,
        task_id,
    );
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    title: String,
    template_type: String,
    input: serde_json::Value,
    requested_by: String,
}

#[derive(Serialize)]
struct CreateTaskResponse {
    task_id: String,
    status: &'static str,
    created_at: DateTime<Utc>,
}

async fn create_task(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    actor.require_role(&[Role::Requester, Role::Admin])?;
    if actor.actor_role == Role::Requester && actor.actor_id != body.requested_by {
        return Err(ApiError::forbidden("requester may only create tasks for themselves"));
    }
    if body.title.trim().is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }

    let handler = state
        .templates
        .get(&body.template_type)
        .ok_or_else(|| ApiError::validation(format!("unsupported template_type: {}", body.template_type)))?;
    handler.validate(&body.input).map_err(|err| ApiError::validation(err.to_string()))?;

    let now = Utc::now();
    let task =
        state.store.create_task(body.title, body.template_type, body.input, body.requested_by, now).await;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse { task_id: task.task_id.0, status: task.status.as_str(), created_at: task.created_at }),
    ))
}

#[derive(Deserialize)]
struct RunTaskRequest {
    task_id: String,
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct RunTaskResponse {
    task_id: String,
    status: &'static str,
    started_at: Option<DateTime<Utc>>,
}

async fn run_task(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(body): Json<RunTaskRequest>,
) -> Result<(StatusCode, Json<RunTaskResponse>), ApiError> {
    actor.require_role(&[Role::Requester, Role::Admin])?;

    let task_id = TaskId(body.task_id);
    let now = Utc::now();
    let outcome = state
        .store
        .run_task(&task_id, &actor.actor_id, actor.actor_role == Role::Admin, body.idempotency_key, now)
        .await?;

    if outcome.dispatch {
        dispatch_pipeline(&state, outcome.task_id.clone());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(RunTaskResponse {
            task_id: outcome.task_id.0,
            status: outcome.status.as_str(),
            started_at: outcome.started_at,
        }),
    ))
}

async fn load_task_for_viewer(state: &AppState, actor: &ActorContext, task_id: &TaskId) -> Result<Task, ApiError> {
    let task = state
        .store
        .get_task(task_id)
        .await
        .ok_or_else(|| ApiError::from(ApplicationError::TaskNotFound(task_id.0.clone())))?;
    actor.require_task_owner_if_requester(&task.requested_by)?;
    Ok(task)
}

async fn task_status(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    actor.require_role(&[Role::Requester, Role::Reviewer, Role::Approver, Role::Admin])?;
    let task = load_task_for_viewer(&state, &actor, &TaskId(id)).await?;
    Ok(Json(task))
}

#[derive(Serialize)]
struct EventsResponse {
    task_id: String,
    items: Vec<TaskEvent>,
    count: usize,
}

async fn task_events(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
) -> Result<Json<EventsResponse>, ApiError> {
    actor.require_role(&[Role::Requester, Role::Reviewer, Role::Approver, Role::Admin])?;
    let task_id = TaskId(id);
    let task = load_task_for_viewer(&state, &actor, &task_id).await?;
    let items = state.store.get_events(&task.task_id).await;
    let count = items.len();
    Ok(Json(EventsResponse { task_id: task.task_id.0, items, count }))
}

#[derive(Deserialize)]
struct ApprovalsQuery {
    status: Option<String>,
    approver_group: Option<String>,
}

#[derive(Serialize)]
struct ApprovalsResponse {
    items: Vec<ApprovalItem>,
    count: usize,
}

async fn list_approvals(
    State(state): State<AppState>,
    actor: ActorContext,
    Query(query): Query<ApprovalsQuery>,
) -> Result<Json<ApprovalsResponse>, ApiError> {
    actor.require_role(&[Role::Approver, Role::Admin])?;

    let status = match query.status.as_deref() {
        Some(raw) => {
            Some(ApprovalStatus::parse(raw).ok_or_else(|| ApiError::validation(format!("invalid status filter: {raw}")))?)
        }
        None => None,
    };

    let items = state.store.list_approvals(status, query.approver_group.as_deref()).await;
    let count = items.len();
    Ok(Json(ApprovalsResponse { items, count }))
}

#[derive(Deserialize, Default)]
struct ApprovalDecisionRequest {
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Serialize)]
struct ApprovalDecisionResponse {
    queue_id: String,
    status: &'static str,
    task_status: &'static str,
}

async fn decide(
    state: &AppState,
    actor: &ActorContext,
    id: String,
    kind: ApprovalDecisionKind,
    comment: Option<String>,
) -> Result<Json<ApprovalDecisionResponse>, ApiError> {
    actor.require_role(&[Role::Approver, Role::Admin])?;

    let queue_id = ApprovalQueueId(id);
    let now = Utc::now();
    let dispatch_on_approve = matches!(kind, ApprovalDecisionKind::Approve);
    let result = state.store.decide_approval(&queue_id, kind, actor.actor_id.clone(), comment, now).await?;

    if dispatch_on_approve && result.dispatch {
        dispatch_pipeline(state, result.task_id.clone());
    }

    Ok(Json(ApprovalDecisionResponse {
        queue_id: result.approval.queue_id.0,
        status: result.approval.status.as_str(),
        task_status: result.task_status.as_str(),
    }))
}

async fn approve_item(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
    Json(body): Json<ApprovalDecisionRequest>,
) -> Result<Json<ApprovalDecisionResponse>, ApiError> {
    decide(&state, &actor, id, ApprovalDecisionKind::Approve, body.comment).await
}

async fn reject_item(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
    Json(body): Json<ApprovalDecisionRequest>,
) -> Result<Json<ApprovalDecisionResponse>, ApiError> {
    decide(&state, &actor, id, ApprovalDecisionKind::Reject, body.comment).await
}

async fn audit_summary(State(state): State<AppState>, actor: ActorContext) -> Result<Json<AuditSummary>, ApiError> {
    actor.require_role(&[Role::Reviewer, Role::Admin])?;
    Ok(Json(state.store.audit_summary().await))
}
