//! Detection of merges made outside the system
//!
//! A request whose head already reached the base branch was merged by hand
//! (pushed directly, merged locally, fast-forwarded). The detector finds the
//! commit that landed it, credits the author, and records the merge.

use crate::error::Result;
use crate::git::{Ancestry, CommitInfo, VersionControl};
use crate::services::{Collaborators, MergeRequestStore, Notifier, Users};
use crate::types::{MergeRecord, MergeRequest, MergeStatus, User};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finds and records manual merges
pub struct ManualMergeDetector {
    git: Arc<dyn VersionControl>,
    store: Arc<dyn MergeRequestStore>,
    users: Arc<dyn Users>,
    notifier: Arc<dyn Notifier>,
}

impl ManualMergeDetector {
    /// Create a detector from the shared collaborators
    pub fn new(services: &Collaborators) -> Self {
        Self {
            git: Arc::clone(&services.git),
            store: Arc::clone(&services.store),
            users: Arc::clone(&services.users),
            notifier: Arc::clone(&services.notifier),
        }
    }

    /// Detect and record a manual merge of `request`.
    ///
    /// Returns `true` if the request is now recorded as manually merged, in
    /// which case `request` carries the merge metadata. Returns `false` when
    /// detection is disabled, the head is not in the base branch, or the
    /// stored record was already merged.
    pub async fn detect(&self, request: &mut MergeRequest, cancel: &CancellationToken) -> Result<bool> {
        if !request.base_repo.autodetect_manual_merge {
            return Ok(false);
        }

        let ancestry = self
            .git
            .is_ancestor(
                &request.base_repo.path,
                &request.head_ref,
                &request.base_branch,
                cancel,
            )
            .await?;
        if ancestry == Ancestry::NotAncestor {
            debug!(request = %request, "head is not in base branch");
            return Ok(false);
        }

        let commit = self.find_merge_commit(request, cancel).await?;
        let merger = self.attribute(&commit, request).await;

        let record = MergeRecord {
            commit_id: commit.id,
            merged_at: commit.author.when,
            merger,
            status: MergeStatus::ManuallyMerged,
        };

        if !self.store.mark_merged(request.id, &record).await? {
            debug!(request = %request, "already recorded as merged");
            return Ok(false);
        }

        request.apply_merge(&record);
        self.notifier.merged(&record.merger, request).await;

        info!(
            request = %request,
            commit = %record.commit_id,
            merger = %record.merger.name,
            "merge request was merged manually"
        );
        Ok(true)
    }

    /// The commit that brought the head of `request` into its base branch.
    ///
    /// The oldest merge commit on the ancestry path from head to base, or
    /// the head itself when the base was fast-forwarded.
    pub async fn find_merge_commit(
        &self,
        request: &MergeRequest,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo> {
        let repo = &request.base_repo.path;
        let head = self.git.full_commit_id(repo, &request.head_ref, cancel).await?;

        let found = self
            .git
            .first_merge_on_ancestry_path(repo, &head, &request.base_branch, cancel)
            .await?;

        let full_length = request.base_repo.object_format.full_length();
        let commit_id = match found.as_deref().and_then(|id| id.get(..full_length)) {
            Some(id) => id.to_string(),
            None => {
                debug!(request = %request, head = %head, "no merge commit found, assuming fast-forward");
                head
            }
        };

        self.git.commit_info(repo, &commit_id, cancel).await
    }

    /// Credit the merge to the commit author, or the repository owner if the
    /// author is unknown.
    async fn attribute(&self, commit: &CommitInfo, request: &MergeRequest) -> User {
        match self.users.user_by_email(&commit.author.email).await {
            Ok(Some(user)) => user,
            Ok(None) => request.base_repo.owner.clone(),
            Err(e) => {
                warn!(
                    request = %request,
                    email = %commit.author.email,
                    error = %e,
                    "user lookup failed, crediting repository owner"
                );
                request.base_repo.owner.clone()
            }
        }
    }
}
