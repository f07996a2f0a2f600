use std::sync::Arc;

use orchestrator_core::domain::task::{PipelineStage, TaskId};

use crate::store::{PolicyOutcome, RetryDecision, StageAdvance, Store};
use crate::templates::TemplateRegistry;

/// Dispatches one pipeline run in the background, mirroring
/// `_start_pipeline`'s daemon-thread spawn.
pub fn spawn_pipeline(
    store: Arc<Store>,
    templates: Arc<TemplateRegistry>,
    reports_root: String,
    max_retry: u32,
    task_id: TaskId,
) {
    tokio::spawn(async move {
        run_pipeline(&store, &templates, &reports_root, max_retry, &task_id).await;
    });
}

enum ExecuteOutcome {
    Done,
    Blocked,
    Failed(String),
}

/// Retry-then-escalate loop: a stage failure either loops the task back
/// through FAILED_RETRYABLE -> RUNNING (continue) or escalates it to
/// NEEDS_HUMAN_APPROVAL (return), per spec.md §4.5 / §9. Exposed (rather
/// than only reachable through `spawn_pipeline`) so tests can drive one
/// pipeline run to completion and assert on the resulting task/event state
/// without racing a background task.
pub async fn run_pipeline(
    store: &Store,
    templates: &TemplateRegistry,
    reports_root: &str,
    max_retry: u32,
    task_id: &TaskId,
) {
    loop {
        match execute_once(store, templates, reports_root, task_id).await {
            ExecuteOutcome::Done | ExecuteOutcome::Blocked => return,
            ExecuteOutcome::Failed(message) => {
                match store.record_failure_and_retry_or_escalate(task_id, message, max_retry).await {
                    RetryDecision::Retrying => continue,
                    RetryDecision::Escalated => return,
                }
            }
        }
    }
}

/// One pass through planner -> executor(policy) -> render -> reviewer ->
/// reporter, mirroring `_execute_once`'s four lock-scope structure. Render
/// and the report file write happen outside any lock, between the
/// policy-check scope and the reviewer/reporter scope.
async fn execute_once(
    store: &Store,
    templates: &TemplateRegistry,
    reports_root: &str,
    task_id: &TaskId,
) -> ExecuteOutcome {
    if let StageAdvance::Skip = store.begin_stage(task_id, PipelineStage::Planner).await {
        return ExecuteOutcome::Done;
    }

    let task = match store.evaluate_policy(task_id).await {
        PolicyOutcome::Blocked => return ExecuteOutcome::Blocked,
        PolicyOutcome::Clear(task) => task,
    };

    let Some(handler) = templates.get(&task.template_type) else {
        return ExecuteOutcome::Failed(format!("no template handler registered for {}", task.template_type));
    };

    let rendered = match handler.render(&task) {
        Ok(rendered) => rendered,
        Err(err) => return ExecuteOutcome::Failed(err.to_string()),
    };

    if let StageAdvance::Skip = store.begin_stage(task_id, PipelineStage::Reviewer).await {
        return ExecuteOutcome::Done;
    }
    if let Err(err) = handler.review(&rendered) {
        return ExecuteOutcome::Failed(err.to_string());
    }

    let report_path = match write_report(reports_root, task_id, &rendered).await {
        Ok(path) => path,
        Err(message) => return ExecuteOutcome::Failed(message),
    };

    match store.finalize_success(task_id, report_path).await {
        Ok(()) => ExecuteOutcome::Done,
        Err(message) => ExecuteOutcome::Failed(message),
    }
}

async fn write_report(reports_root: &str, task_id: &TaskId, rendered: &str) -> Result<String, String> {
    let dir = std::path::Path::new(reports_root).join(&task_id.0);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| format!("failed to create report directory: {err}"))?;

    let path = dir.join("report.md");
    tokio::fs::write(&path, rendered)
        .await
        .map_err(|err| format!("failed to write report: {err}"))?;

    Ok(path.to_string_lossy().into_owned())
}
