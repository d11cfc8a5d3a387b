//! Background status check
//!
//! Run by the queue worker while holding the request's lock:
//!
//! ```text
//! Checking -> ManuallyMerged           (head already in base)
//! Checking -> Conflicted | Empty       (set by the merge simulation)
//! Checking -> Mergeable                (clean merge)
//! Checking -> Error                    (the simulation itself failed)
//! ```

use super::MergeabilityChecker;
use super::protection::protected_files;
use crate::error::{Error, Result};
use crate::git::MergeTestOutcome;
use crate::queue::UniqueQueue;
use crate::types::{Column, MergeRequest, MergeRequestId, MergeStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Columns written by a successful check
const CHECK_COLUMNS: &[Column] = &[
    Column::MergeBase,
    Column::Status,
    Column::ConflictedFiles,
    Column::ChangedProtectedFiles,
    Column::CommitsBehind,
];

impl MergeabilityChecker {
    /// Recompute and persist the status of request `id`.
    ///
    /// If `queue` already holds a fresh token for the request when the
    /// check finishes, the result is dropped in favor of the pending check.
    pub async fn refresh_status(
        &self,
        id: MergeRequestId,
        queue: &UniqueQueue,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let services = self.services();
        let mut request = services.store.get_by_id(id).await?;

        if request.has_merged {
            debug!(request = %request, "already merged, nothing to check");
            return Ok(());
        }

        match self.detector().detect(&mut request, cancel).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                self.mark_error(&mut request).await;
                return Err(e);
            }
        }

        let outcome = match self.test_merge(&request, cancel).await {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                self.mark_error(&mut request).await;
                return Err(e);
            }
        };

        if let Err(e) = self.apply_outcome(&mut request, outcome).await {
            self.mark_error(&mut request).await;
            return Err(e);
        }
        mark_as_mergeable(&mut request);

        if queue.has(&request.queue_token()) {
            info!(request = %request, "newer check pending, dropping result");
            return Ok(());
        }

        services
            .store
            .update_columns_if_not_merged(&request, CHECK_COLUMNS)
            .await?;
        debug!(request = %request, status = %request.status, "status updated");

        if services.auto_merge.has_scheduled_merge(request.id).await? {
            services.auto_merge.reevaluate(&request).await?;
        }

        Ok(())
    }

    async fn test_merge(
        &self,
        request: &MergeRequest,
        cancel: &CancellationToken,
    ) -> Result<MergeTestOutcome> {
        self.services()
            .git
            .test_merge(
                &request.base_repo.path,
                &request.base_branch,
                &request.head_ref,
                cancel,
            )
            .await
    }

    /// Copy the simulation results onto `request`.
    ///
    /// Leaves the status at `Checking` for a clean, non-empty merge.
    async fn apply_outcome(&self, request: &mut MergeRequest, outcome: MergeTestOutcome) -> Result<()> {
        let rule = self
            .services()
            .rules
            .first_matching_rule(request.base_repo.id, &request.base_branch)
            .await?;

        request.status = if outcome.is_conflicted() {
            MergeStatus::Conflicted
        } else if outcome.is_empty() {
            MergeStatus::Empty
        } else {
            MergeStatus::Checking
        };
        request.changed_protected_files = protected_files(rule.as_ref(), &outcome.changed_files);
        request.merge_base = Some(outcome.merge_base);
        request.conflicted_files = outcome.conflicted_files;
        request.commits_behind = outcome.commits_behind;
        Ok(())
    }

    /// Record that the check itself failed. Only the status is written, and
    /// a merge recorded in the meantime is kept.
    async fn mark_error(&self, request: &mut MergeRequest) {
        request.status = MergeStatus::Error;
        if let Err(e) = self
            .services()
            .store
            .update_columns_if_not_merged(request, &[Column::Status])
            .await
        {
            warn!(request = %request, error = %e, "failed to record check error");
        }
    }
}

/// A check that left the status at `Checking` found nothing wrong.
fn mark_as_mergeable(request: &mut MergeRequest) {
    if request.status == MergeStatus::Checking {
        request.status = MergeStatus::Mergeable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Issue, ObjectFormat, Repository, User};
    use chrono::Utc;
    use std::path::PathBuf;

    fn make_request(status: MergeStatus) -> MergeRequest {
        MergeRequest {
            id: 7,
            index: 3,
            issue: Issue {
                id: 70,
                title: "Fix".to_string(),
                is_closed: false,
                updated_at: Utc::now(),
            },
            base_repo: Repository {
                id: 1,
                name: "repo".to_string(),
                owner: User {
                    id: 1,
                    name: "owner".to_string(),
                    email: "owner@example.com".to_string(),
                },
                path: PathBuf::from("/srv/repo.git"),
                object_format: ObjectFormat::Sha1,
                autodetect_manual_merge: false,
            },
            base_branch: "main".to_string(),
            head_branch: "fix".to_string(),
            head_ref: MergeRequest::default_head_ref(3),
            status,
            merge_base: None,
            conflicted_files: Vec::new(),
            changed_protected_files: Vec::new(),
            commits_behind: 0,
            approvals: 0,
            has_rejected_review: false,
            status_checks_passed: false,
            has_merged: false,
            merged_commit_id: None,
            merged_at: None,
            merger: None,
        }
    }

    #[test]
    fn test_mark_as_mergeable_only_from_checking() {
        let mut request = make_request(MergeStatus::Checking);
        mark_as_mergeable(&mut request);
        assert_eq!(request.status, MergeStatus::Mergeable);

        for status in [MergeStatus::Conflicted, MergeStatus::Empty, MergeStatus::Error] {
            let mut request = make_request(status);
            mark_as_mergeable(&mut request);
            assert_eq!(request.status, status);
        }
    }
}
