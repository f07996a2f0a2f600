use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::approval::{ApprovalItem, ApprovalStatus};
use crate::domain::approval_action::{ApprovalAction, ApprovalActionKind};

/// Pure decision logic for the approval queue, per spec.md §4.3. Entity
/// lookup (queue item exists?) is the caller's concern — `APPROVAL_NOT_FOUND`
/// never originates here. This module only enforces the PENDING
/// precondition and produces the updated item plus its immutable action
/// record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalQueueError {
    #[error("approval item is not PENDING: {current:?}")]
    NotPending { current: ApprovalStatus },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalDecisionOutcome {
    pub approval: ApprovalItem,
    pub action: ApprovalAction,
}

pub fn decide_approve(
    mut item: ApprovalItem,
    acted_by: impl Into<String>,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<ApprovalDecisionOutcome, ApprovalQueueError> {
    require_pending(&item)?;
    item.status = ApprovalStatus::Approved;
    item.resolved_at = Some(now);

    let action = ApprovalAction::new(
        item.queue_id.clone(),
        item.task_id.clone(),
        ApprovalActionKind::Approve,
        acted_by,
        comment,
        now,
    );

    Ok(ApprovalDecisionOutcome { approval: item, action })
}

pub fn decide_reject(
    mut item: ApprovalItem,
    acted_by: impl Into<String>,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<ApprovalDecisionOutcome, ApprovalQueueError> {
    require_pending(&item)?;
    item.status = ApprovalStatus::Rejected;
    item.resolved_at = Some(now);

    let action = ApprovalAction::new(
        item.queue_id.clone(),
        item.task_id.clone(),
        ApprovalActionKind::Reject,
        acted_by,
        comment,
        now,
    );

    Ok(ApprovalDecisionOutcome { approval: item, action })
}

fn require_pending(item: &ApprovalItem) -> Result<(), ApprovalQueueError> {
    if item.status != ApprovalStatus::Pending {
        return Err(ApprovalQueueError::NotPending { current: item.status });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::approval::ApprovalItem;
    use crate::domain::task::TaskId;

    use super::{decide_approve, decide_reject, ApprovalQueueError};

    fn sample_item() -> ApprovalItem {
        ApprovalItem::new(
            TaskId("task_abc".to_string()),
            "external_send_requested",
            "alice",
            Utc::now(),
        )
    }

    #[test]
    fn approve_sets_status_and_records_action() {
        let outcome = decide_approve(sample_item(), "bob", None, Utc::now()).expect("approve");
        assert_eq!(outcome.approval.status, crate::domain::approval::ApprovalStatus::Approved);
        assert!(outcome.approval.resolved_at.is_some());
        assert_eq!(outcome.action.acted_by, "bob");
    }

    #[test]
    fn reject_sets_status_and_records_action() {
        let outcome = decide_reject(sample_item(), "bob", Some("no".to_string()), Utc::now())
            .expect("reject");
        assert_eq!(outcome.approval.status, crate::domain::approval::ApprovalStatus::Rejected);
        assert_eq!(outcome.action.comment.as_deref(), Some("no"));
    }

    #[test]
    fn approving_twice_fails_the_second_time() {
        let approved = decide_approve(sample_item(), "bob", None, Utc::now()).unwrap().approval;
        let error = decide_approve(approved, "bob", None, Utc::now()).unwrap_err();
        assert!(matches!(error, ApprovalQueueError::NotPending { .. }));
    }
}
