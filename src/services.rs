//! Collaborator services consumed by the checker
//!
//! Persistence, policy lookup, identity, permissions, signing, notification
//! and auto-merge live outside this crate. Each is reached through one of the
//! narrow traits below, bundled in [`Collaborators`] so the checker and the
//! scheduler can be wired with real services or test doubles alike.

use crate::error::Result;
use crate::git::VersionControl;
use crate::types::{
    BranchProtectionRule, Column, Issue, MergeRecord, MergeRequest, MergeRequestId, MergeStatus,
    Permission, Repository, User,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Persistence of merge request records
#[async_trait]
pub trait MergeRequestStore: Send + Sync {
    /// Load a merge request with its issue and base repository
    async fn get_by_id(&self, id: MergeRequestId) -> Result<MergeRequest>;

    /// Write the given columns from `request`, unless the stored record is
    /// already merged
    async fn update_columns_if_not_merged(
        &self,
        request: &MergeRequest,
        columns: &[Column],
    ) -> Result<()>;

    /// Write the given columns from `request` unconditionally
    async fn update_columns(&self, request: &MergeRequest, columns: &[Column]) -> Result<()>;

    /// Record merge metadata unless the stored record is already merged.
    ///
    /// Returns whether the record was updated.
    async fn mark_merged(&self, id: MergeRequestId, record: &MergeRecord) -> Result<bool>;

    /// All unmerged requests targeting `branch` of repository `repo_id`
    async fn list_unmerged_by_base(&self, repo_id: i64, branch: &str)
    -> Result<Vec<MergeRequest>>;

    /// IDs of all requests in `status`
    async fn list_ids_by_status(&self, status: MergeStatus) -> Result<Vec<MergeRequestId>>;
}

/// Branch protection rule lookup
#[async_trait]
pub trait ProtectionRules: Send + Sync {
    /// The first rule matching `branch` of repository `repo_id`
    async fn first_matching_rule(
        &self,
        repo_id: i64,
        branch: &str,
    ) -> Result<Option<BranchProtectionRule>>;
}

/// User lookup
#[async_trait]
pub trait Users: Send + Sync {
    /// Find a user by (any of their) email addresses
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;
}

/// Permission checks
#[async_trait]
pub trait Permissions: Send + Sync {
    /// Whether `doer` may merge `request` given their permission snapshot
    async fn is_allowed_to_merge(
        &self,
        request: &MergeRequest,
        permission: &Permission,
        doer: &User,
    ) -> Result<bool>;

    /// Whether `doer` administers `repo`
    async fn is_repo_admin(&self, repo: &Repository, doer: &User) -> Result<bool>;
}

/// Issue dependency lookup
#[async_trait]
pub trait Dependencies: Send + Sync {
    /// Whether every issue blocking `issue` is closed
    async fn no_dependencies_left(&self, issue: &Issue) -> Result<bool>;
}

/// Merge notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A request was found merged, credited to `merger`
    async fn merged(&self, merger: &User, request: &MergeRequest);
}

/// Scheduled ("merge when checks succeed") merges
#[async_trait]
pub trait AutoMerge: Send + Sync {
    /// Whether a scheduled merge exists for the request
    async fn has_scheduled_merge(&self, id: MergeRequestId) -> Result<bool>;

    /// Re-evaluate the scheduled merge now that the status is fresh
    async fn reevaluate(&self, request: &MergeRequest) -> Result<()>;
}

/// Merge commit signing
#[async_trait]
pub trait MergeSigner: Send + Sync {
    /// Whether a merge of `request` by `doer` would be signed
    async fn sign_merge(
        &self,
        request: &MergeRequest,
        doer: &User,
        base_path: &Path,
        base_branch: &str,
        head_ref: &str,
    ) -> Result<bool>;
}

/// Every collaborator the checker and scheduler need
#[derive(Clone)]
pub struct Collaborators {
    /// Merge request persistence
    pub store: Arc<dyn MergeRequestStore>,
    /// Version control access
    pub git: Arc<dyn VersionControl>,
    /// Branch protection rules
    pub rules: Arc<dyn ProtectionRules>,
    /// User lookup
    pub users: Arc<dyn Users>,
    /// Permission checks
    pub permissions: Arc<dyn Permissions>,
    /// Issue dependencies
    pub dependencies: Arc<dyn Dependencies>,
    /// Merge notifications
    pub notifier: Arc<dyn Notifier>,
    /// Scheduled merges
    pub auto_merge: Arc<dyn AutoMerge>,
    /// Merge signing
    pub signer: Arc<dyn MergeSigner>,
}
