//! File-backed state
//!
//! [`FileState`] keeps users, repositories, issues, merge requests and
//! branch protection rules in one TOML file and serves every collaborator
//! trait the checker needs from it. Records reference each other by id and
//! are joined into [`MergeRequest`] snapshots on read.
//!
//! Several processes may share the file. Collaborator reads reload it under
//! a shared advisory lock; writes reload, apply and save it under an
//! exclusive one, so a change made by another process is never overwritten
//! with an older copy.

mod storage;

pub use storage::{default_state_path, load_state, save_state};

use storage::{LockMode, lock_state};

use crate::error::{Error, Result};
use crate::git::VersionControl;
use crate::services::{
    AutoMerge, Collaborators, Dependencies, MergeRequestStore, MergeSigner, Notifier, Permissions,
    ProtectionRules, Users,
};
use crate::types::{
    AccessMode, BranchProtectionRule, Column, Issue, MergeRecord, MergeRequest, MergeRequestId,
    MergeStatus, ObjectFormat, Permission, Repository, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Current state file format version
pub const STATE_VERSION: u32 = 1;

/// Contents of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateData {
    /// Format version
    pub version: u32,
    /// Requests with a "merge when checks succeed" schedule
    pub scheduled_merges: Vec<MergeRequestId>,
    /// User accounts
    pub users: Vec<UserRecord>,
    /// Repositories
    pub repositories: Vec<RepositoryRecord>,
    /// Issues backing merge requests
    pub issues: Vec<IssueRecord>,
    /// Merge requests
    pub merge_requests: Vec<MergeRequestRecord>,
    /// Branch protection rules
    pub protection_rules: Vec<ProtectionRuleRecord>,
    /// Repository collaborators
    pub collaborators: Vec<CollaboratorRecord>,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            scheduled_merges: Vec::new(),
            users: Vec::new(),
            repositories: Vec::new(),
            issues: Vec::new(),
            merge_requests: Vec::new(),
            protection_rules: Vec::new(),
            collaborators: Vec::new(),
        }
    }
}

impl StateData {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }
}

/// A stored user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// User ID
    pub id: i64,
    /// Login name
    pub name: String,
    /// Primary email
    pub email: String,
    /// Key used to sign merges made on behalf of this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl UserRecord {
    fn to_user(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// A stored repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// Repository ID
    pub id: i64,
    /// Repository name
    pub name: String,
    /// Owning user
    pub owner_id: i64,
    /// Path of the repository on disk
    pub path: PathBuf,
    /// Object id format
    #[serde(default)]
    pub object_format: ObjectFormat,
    /// Detect merges made outside mergecheck
    #[serde(default = "default_true")]
    pub autodetect_manual_merge: bool,
}

/// A stored issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueRecord {
    /// Issue ID
    pub id: i64,
    /// Title
    pub title: String,
    /// Whether the issue is closed
    #[serde(default)]
    pub is_closed: bool,
    /// Time of last activity
    pub updated_at: DateTime<Utc>,
    /// Issues that must be closed before this one can be merged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<i64>,
}

/// A stored merge request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeRequestRecord {
    /// Merge request ID
    pub id: MergeRequestId,
    /// Per-repository number
    pub index: u64,
    /// Backing issue
    pub issue_id: i64,
    /// Repository merged into
    pub base_repo_id: i64,
    /// Branch merged into
    pub base_branch: String,
    /// Branch merged from
    pub head_branch: String,
    /// Head reference in the base repository; `refs/pull/<index>/head` if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_ref: Option<String>,
    /// Mergeability status
    pub status: MergeStatus,
    /// Computed merge base
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_base: Option<String>,
    /// Conflicting paths
    pub conflicted_files: Vec<String>,
    /// Changed protected paths
    pub changed_protected_files: Vec<String>,
    /// Base commits missing from head
    pub commits_behind: u32,
    /// Approving reviews
    pub approvals: u32,
    /// A review requested changes
    pub has_rejected_review: bool,
    /// Required status checks passed
    pub status_checks_passed: bool,
    /// Whether merged
    pub has_merged: bool,
    /// Merge commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_commit_id: Option<String>,
    /// Merge time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Merging user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merger_id: Option<i64>,
}

impl MergeRequestRecord {
    fn copy_columns(&mut self, from: &MergeRequest, columns: &[Column]) {
        for column in columns {
            match column {
                Column::Status => self.status = from.status,
                Column::MergeBase => self.merge_base.clone_from(&from.merge_base),
                Column::ConflictedFiles => self.conflicted_files.clone_from(&from.conflicted_files),
                Column::ChangedProtectedFiles => {
                    self.changed_protected_files
                        .clone_from(&from.changed_protected_files);
                }
                Column::CommitsBehind => self.commits_behind = from.commits_behind,
            }
        }
    }
}

/// A branch protection rule scoped to a repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectionRuleRecord {
    /// Repository the rule applies to
    pub repo_id: i64,
    /// Branch name or glob pattern
    pub branch: String,
    /// Rule settings
    #[serde(default)]
    pub rule: BranchProtectionRule,
}

/// A user's access to a repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollaboratorRecord {
    /// Repository
    pub repo_id: i64,
    /// User
    pub user_id: i64,
    /// Granted access
    pub access: AccessMode,
}

/// State file serving every collaborator trait
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    data: Mutex<StateData>,
}

impl FileState {
    /// Open the state file at `path`, starting empty if it doesn't exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_state(&path)?;
        debug!(
            path = %path.display(),
            merge_requests = data.merge_requests.len(),
            "state loaded"
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> MutexGuard<'_, StateData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> StateData {
        self.data().clone()
    }

    /// Find a user by login name
    pub fn user_by_name(&self, name: &str) -> Option<User> {
        self.data()
            .users
            .iter()
            .find(|u| u.name == name)
            .map(UserRecord::to_user)
    }

    /// Effective access of `user` on repository `repo_id`
    pub fn access_mode(&self, repo_id: i64, user: &User) -> AccessMode {
        access_mode(&self.data(), repo_id, user.id)
    }

    /// Permission snapshot of `user` on the base repository of `request`
    pub fn permission_for(&self, request: &MergeRequest, user: &User) -> Permission {
        Permission {
            access_mode: self.access_mode(request.base_repo.id, user),
        }
    }

    /// Bundle this state with `git` into the checker's collaborators
    pub fn collaborators(self: &Arc<Self>, git: Arc<dyn VersionControl>) -> Collaborators {
        Collaborators {
            store: Arc::clone(self) as Arc<dyn MergeRequestStore>,
            git,
            rules: Arc::clone(self) as Arc<dyn ProtectionRules>,
            users: Arc::clone(self) as Arc<dyn Users>,
            permissions: Arc::clone(self) as Arc<dyn Permissions>,
            dependencies: Arc::clone(self) as Arc<dyn Dependencies>,
            notifier: Arc::new(LogNotifier),
            auto_merge: Arc::clone(self) as Arc<dyn AutoMerge>,
            signer: Arc::clone(self) as Arc<dyn MergeSigner>,
        }
    }

    /// Reload the file under a shared lock and return the fresh contents.
    fn reload(&self) -> Result<MutexGuard<'_, StateData>> {
        let mut data = self.data();
        let _lock = lock_state(&self.path, LockMode::Shared)?;
        *data = load_state(&self.path)?;
        Ok(data)
    }

    /// Apply `f` to merge request `id` of the current file and save.
    ///
    /// The in-memory copy is replaced only once the file has been written.
    fn update_record(
        &self,
        id: MergeRequestId,
        f: impl FnOnce(&mut MergeRequestRecord) -> bool,
    ) -> Result<bool> {
        let mut data = self.data();
        let _lock = lock_state(&self.path, LockMode::Exclusive)?;
        let mut fresh = load_state(&self.path)?;
        let record = fresh
            .merge_requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::NotFound(id))?;
        let changed = f(record);
        if changed {
            save_state(&self.path, &fresh)?;
        }
        *data = fresh;
        Ok(changed)
    }
}

fn access_mode(data: &StateData, repo_id: i64, user_id: i64) -> AccessMode {
    let is_owner = data
        .repositories
        .iter()
        .any(|r| r.id == repo_id && r.owner_id == user_id);
    if is_owner {
        return AccessMode::Owner;
    }
    data.collaborators
        .iter()
        .filter(|c| c.repo_id == repo_id && c.user_id == user_id)
        .map(|c| c.access)
        .max()
        .unwrap_or_default()
}

fn find_user(data: &StateData, id: i64) -> Result<User> {
    data.users
        .iter()
        .find(|u| u.id == id)
        .map(UserRecord::to_user)
        .ok_or_else(|| Error::Store(format!("user {id} not found")))
}

fn find_repository(data: &StateData, id: i64) -> Result<Repository> {
    let record = data
        .repositories
        .iter()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::Store(format!("repository {id} not found")))?;
    Ok(Repository {
        id: record.id,
        name: record.name.clone(),
        owner: find_user(data, record.owner_id)?,
        path: record.path.clone(),
        object_format: record.object_format,
        autodetect_manual_merge: record.autodetect_manual_merge,
    })
}

fn find_issue(data: &StateData, id: i64) -> Result<&IssueRecord> {
    data.issues
        .iter()
        .find(|i| i.id == id)
        .ok_or_else(|| Error::Store(format!("issue {id} not found")))
}

/// Join a stored record with its issue, repository and merger.
fn build_request(data: &StateData, record: &MergeRequestRecord) -> Result<MergeRequest> {
    let issue = find_issue(data, record.issue_id)?;
    let merger = record.merger_id.map(|id| find_user(data, id)).transpose()?;

    Ok(MergeRequest {
        id: record.id,
        index: record.index,
        issue: Issue {
            id: issue.id,
            title: issue.title.clone(),
            is_closed: issue.is_closed,
            updated_at: issue.updated_at,
        },
        base_repo: find_repository(data, record.base_repo_id)?,
        base_branch: record.base_branch.clone(),
        head_branch: record.head_branch.clone(),
        head_ref: record
            .head_ref
            .clone()
            .unwrap_or_else(|| MergeRequest::default_head_ref(record.index)),
        status: record.status,
        merge_base: record.merge_base.clone(),
        conflicted_files: record.conflicted_files.clone(),
        changed_protected_files: record.changed_protected_files.clone(),
        commits_behind: record.commits_behind,
        approvals: record.approvals,
        has_rejected_review: record.has_rejected_review,
        status_checks_passed: record.status_checks_passed,
        has_merged: record.has_merged,
        merged_commit_id: record.merged_commit_id.clone(),
        merged_at: record.merged_at,
        merger,
    })
}

#[async_trait]
impl MergeRequestStore for FileState {
    async fn get_by_id(&self, id: MergeRequestId) -> Result<MergeRequest> {
        let data = self.reload()?;
        let record = data
            .merge_requests
            .iter()
            .find(|r| r.id == id)
            .ok_or(Error::NotFound(id))?;
        build_request(&data, record)
    }

    async fn update_columns_if_not_merged(
        &self,
        request: &MergeRequest,
        columns: &[Column],
    ) -> Result<()> {
        let updated = self.update_record(request.id, |record| {
            if record.has_merged {
                return false;
            }
            record.copy_columns(request, columns);
            true
        })?;
        if !updated {
            debug!(request = %request, "already merged, columns not updated");
        }
        Ok(())
    }

    async fn update_columns(&self, request: &MergeRequest, columns: &[Column]) -> Result<()> {
        self.update_record(request.id, |record| {
            record.copy_columns(request, columns);
            true
        })?;
        Ok(())
    }

    async fn mark_merged(&self, id: MergeRequestId, merge: &MergeRecord) -> Result<bool> {
        self.update_record(id, |record| {
            if record.has_merged {
                return false;
            }
            record.has_merged = true;
            record.status = merge.status;
            record.merged_commit_id = Some(merge.commit_id.clone());
            record.merged_at = Some(merge.merged_at);
            record.merger_id = Some(merge.merger.id);
            true
        })
    }

    async fn list_unmerged_by_base(
        &self,
        repo_id: i64,
        branch: &str,
    ) -> Result<Vec<MergeRequest>> {
        let data = self.reload()?;
        let mut requests = Vec::new();
        for record in data
            .merge_requests
            .iter()
            .filter(|r| !r.has_merged && r.base_repo_id == repo_id && r.base_branch == branch)
        {
            let request = build_request(&data, record)?;
            if !request.issue.is_closed {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    async fn list_ids_by_status(&self, status: MergeStatus) -> Result<Vec<MergeRequestId>> {
        Ok(self
            .reload()?
            .merge_requests
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.id)
            .collect())
    }
}

#[async_trait]
impl ProtectionRules for FileState {
    /// Exact branch names win over patterns; patterns are tried in file
    /// order.
    async fn first_matching_rule(
        &self,
        repo_id: i64,
        branch: &str,
    ) -> Result<Option<BranchProtectionRule>> {
        let data = self.reload()?;
        let rules: Vec<&ProtectionRuleRecord> = data
            .protection_rules
            .iter()
            .filter(|r| r.repo_id == repo_id)
            .collect();

        if let Some(exact) = rules.iter().find(|r| r.branch == branch) {
            return Ok(Some(named_rule(exact)));
        }

        for record in rules {
            let pattern = glob::Pattern::new(&record.branch)
                .map_err(|e| Error::Store(format!("invalid branch pattern {:?}: {e}", record.branch)))?;
            if pattern.matches(branch) {
                return Ok(Some(named_rule(record)));
            }
        }
        Ok(None)
    }
}

fn named_rule(record: &ProtectionRuleRecord) -> BranchProtectionRule {
    let mut rule = record.rule.clone();
    if rule.rule_name.is_empty() {
        rule.rule_name.clone_from(&record.branch);
    }
    rule
}

#[async_trait]
impl Users for FileState {
    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .reload()?
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(UserRecord::to_user))
    }
}

#[async_trait]
impl Permissions for FileState {
    async fn is_allowed_to_merge(
        &self,
        _request: &MergeRequest,
        permission: &Permission,
        _doer: &User,
    ) -> Result<bool> {
        Ok(permission.access_mode >= AccessMode::Write)
    }

    async fn is_repo_admin(&self, repo: &Repository, doer: &User) -> Result<bool> {
        let data = self.reload()?;
        Ok(access_mode(&data, repo.id, doer.id) >= AccessMode::Admin)
    }
}

#[async_trait]
impl Dependencies for FileState {
    async fn no_dependencies_left(&self, issue: &Issue) -> Result<bool> {
        let data = self.reload()?;
        let record = find_issue(&data, issue.id)?;
        for blocker in &record.blocked_by {
            if !find_issue(&data, *blocker)?.is_closed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl AutoMerge for FileState {
    async fn has_scheduled_merge(&self, id: MergeRequestId) -> Result<bool> {
        Ok(self.reload()?.scheduled_merges.contains(&id))
    }

    async fn reevaluate(&self, request: &MergeRequest) -> Result<()> {
        if request.can_auto_merge() {
            info!(request = %request, "scheduled merge is ready");
        } else {
            info!(request = %request, status = %request.status, "scheduled merge still waiting");
        }
        Ok(())
    }
}

#[async_trait]
impl MergeSigner for FileState {
    async fn sign_merge(
        &self,
        request: &MergeRequest,
        doer: &User,
        _base_path: &Path,
        _base_branch: &str,
        _head_ref: &str,
    ) -> Result<bool> {
        let signed = self
            .reload()?
            .users
            .iter()
            .any(|u| u.id == doer.id && u.signing_key.is_some());
        debug!(request = %request, doer = %doer.name, signed, "merge signature");
        Ok(signed)
    }
}

/// Notifier that writes merge events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn merged(&self, merger: &User, request: &MergeRequest) {
        info!(request = %request, merger = %merger.name, "merge request merged");
    }
}
