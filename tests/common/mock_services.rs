//! Mock collaborators for testing
//!
//! These are test utilities - not every helper is used by every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mergecheck::error::{Error, Result};
use mergecheck::git::{Ancestry, CommitInfo, MergeTestOutcome, Signature, VersionControl};
use mergecheck::services::{
    AutoMerge, Collaborators, Dependencies, MergeRequestStore, MergeSigner, Notifier, Permissions,
    ProtectionRules, Users,
};
use mergecheck::types::{
    BranchProtectionRule, Column, Issue, MergeRecord, MergeRequest, MergeRequestId, MergeStatus,
    Permission, Repository, User,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Call record for column updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    pub id: MergeRequestId,
    pub columns: Vec<Column>,
    pub status: MergeStatus,
    pub conditional: bool,
}

// =============================================================================
// Store
// =============================================================================

/// In-memory merge request store
///
/// Conditional updates skip merged records like the real store does.
#[derive(Default)]
pub struct MockStore {
    requests: Mutex<HashMap<MergeRequestId, MergeRequest>>,
    updates: Mutex<Vec<UpdateCall>>,
    fail_updates: Mutex<bool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: MergeRequest) {
        self.requests.lock().unwrap().insert(request.id, request);
    }

    /// Stored copy of a request
    pub fn get(&self, id: MergeRequestId) -> MergeRequest {
        self.requests.lock().unwrap().get(&id).cloned().unwrap()
    }

    pub fn status(&self, id: MergeRequestId) -> MergeStatus {
        self.get(id).status
    }

    pub fn updates(&self) -> Vec<UpdateCall> {
        self.updates.lock().unwrap().clone()
    }

    /// Statuses written for `id`, in order
    pub fn written_statuses(&self, id: MergeRequestId) -> Vec<MergeStatus> {
        self.updates()
            .into_iter()
            .filter(|u| u.id == id && u.columns.contains(&Column::Status))
            .map(|u| u.status)
            .collect()
    }

    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    fn record(&self, request: &MergeRequest, columns: &[Column], conditional: bool) -> Result<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(Error::Store("injected update failure".to_string()));
        }
        self.updates.lock().unwrap().push(UpdateCall {
            id: request.id,
            columns: columns.to_vec(),
            status: request.status,
            conditional,
        });
        Ok(())
    }
}

/// Copy the given persisted columns from `from` onto `stored`
fn copy_columns(stored: &mut MergeRequest, from: &MergeRequest, columns: &[Column]) {
    for column in columns {
        match column {
            Column::Status => stored.status = from.status,
            Column::MergeBase => stored.merge_base.clone_from(&from.merge_base),
            Column::ConflictedFiles => stored.conflicted_files.clone_from(&from.conflicted_files),
            Column::ChangedProtectedFiles => {
                stored
                    .changed_protected_files
                    .clone_from(&from.changed_protected_files);
            }
            Column::CommitsBehind => stored.commits_behind = from.commits_behind,
        }
    }
}

#[async_trait]
impl MergeRequestStore for MockStore {
    async fn get_by_id(&self, id: MergeRequestId) -> Result<MergeRequest> {
        self.requests
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    async fn update_columns_if_not_merged(
        &self,
        request: &MergeRequest,
        columns: &[Column],
    ) -> Result<()> {
        self.record(request, columns, true)?;
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&request.id).ok_or(Error::NotFound(request.id))?;
        if !stored.has_merged {
            copy_columns(stored, request, columns);
        }
        Ok(())
    }

    async fn update_columns(&self, request: &MergeRequest, columns: &[Column]) -> Result<()> {
        self.record(request, columns, false)?;
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&request.id).ok_or(Error::NotFound(request.id))?;
        copy_columns(stored, request, columns);
        Ok(())
    }

    async fn mark_merged(&self, id: MergeRequestId, record: &MergeRecord) -> Result<bool> {
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&id).ok_or(Error::NotFound(id))?;
        if stored.has_merged {
            return Ok(false);
        }
        stored.apply_merge(record);
        Ok(true)
    }

    async fn list_unmerged_by_base(
        &self,
        repo_id: i64,
        branch: &str,
    ) -> Result<Vec<MergeRequest>> {
        let mut found: Vec<MergeRequest> = self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                !r.has_merged
                    && !r.issue.is_closed
                    && r.base_repo.id == repo_id
                    && r.base_branch == branch
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    async fn list_ids_by_status(&self, status: MergeStatus) -> Result<Vec<MergeRequestId>> {
        let mut ids: Vec<MergeRequestId> = self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

// =============================================================================
// Git
// =============================================================================

/// How the mock answers ancestry tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncestryBehavior {
    Ancestor,
    NotAncestor,
    Fail,
}

/// Scriptable version control
///
/// Features:
/// - Configurable ancestry, merge commit and merge simulation results
/// - Error injection for the merge simulation
/// - Execution counting and concurrency tracking for `test_merge`
/// - Optional gate holding `test_merge` until released
pub struct MockGit {
    ancestry: Mutex<AncestryBehavior>,
    head_id: Mutex<String>,
    merge_commit: Mutex<Option<String>>,
    authors: Mutex<HashMap<String, Signature>>,
    outcome: Mutex<std::result::Result<MergeTestOutcome, String>>,
    gate: Option<Arc<Semaphore>>,
    merge_calls: AtomicUsize,
    ancestry_calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

pub const HEAD_ID: &str = "1111111111111111111111111111111111111111";
pub const MERGE_ID: &str = "2222222222222222222222222222222222222222";

impl MockGit {
    pub fn new() -> Self {
        Self {
            ancestry: Mutex::new(AncestryBehavior::NotAncestor),
            head_id: Mutex::new(HEAD_ID.to_string()),
            merge_commit: Mutex::new(None),
            authors: Mutex::new(HashMap::new()),
            outcome: Mutex::new(Ok(clean_outcome())),
            gate: None,
            merge_calls: AtomicUsize::new(0),
            ancestry_calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// A mock whose `test_merge` waits for [`MockGit::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Let `n` waiting or future merge simulations proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn set_ancestry(&self, behavior: AncestryBehavior) {
        *self.ancestry.lock().unwrap() = behavior;
    }

    pub fn set_merge_commit(&self, id: Option<&str>) {
        *self.merge_commit.lock().unwrap() = id.map(String::from);
    }

    pub fn set_author(&self, commit: &str, email: &str, when: DateTime<Utc>) {
        self.authors.lock().unwrap().insert(
            commit.to_string(),
            Signature {
                name: email.split('@').next().unwrap_or_default().to_string(),
                email: email.to_string(),
                when,
            },
        );
    }

    pub fn set_outcome(&self, outcome: MergeTestOutcome) {
        *self.outcome.lock().unwrap() = Ok(outcome);
    }

    pub fn fail_merge(&self, message: &str) {
        *self.outcome.lock().unwrap() = Err(message.to_string());
    }

    /// Number of merge simulations started
    pub fn merge_calls(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }

    pub fn ancestry_calls(&self) -> usize {
        self.ancestry_calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous merge simulations seen
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl Default for MockGit {
    fn default() -> Self {
        Self::new()
    }
}

/// A clean, non-empty merge
pub fn clean_outcome() -> MergeTestOutcome {
    MergeTestOutcome {
        merge_base: "3333333333333333333333333333333333333333".to_string(),
        conflicted_files: Vec::new(),
        changed_files: vec!["src/lib.rs".to_string()],
        commits_behind: 0,
    }
}

#[async_trait]
impl VersionControl for MockGit {
    async fn is_ancestor(
        &self,
        _repo: &Path,
        _commit: &str,
        _of: &str,
        _cancel: &CancellationToken,
    ) -> Result<Ancestry> {
        self.ancestry_calls.fetch_add(1, Ordering::SeqCst);
        match *self.ancestry.lock().unwrap() {
            AncestryBehavior::Ancestor => Ok(Ancestry::Ancestor),
            AncestryBehavior::NotAncestor => Ok(Ancestry::NotAncestor),
            AncestryBehavior::Fail => Err(Error::Git("exit status 128".to_string())),
        }
    }

    async fn full_commit_id(
        &self,
        _repo: &Path,
        _rev: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.head_id.lock().unwrap().clone())
    }

    async fn first_merge_on_ancestry_path(
        &self,
        _repo: &Path,
        _from: &str,
        _to: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        Ok(self.merge_commit.lock().unwrap().clone())
    }

    async fn commit_info(
        &self,
        _repo: &Path,
        id: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommitInfo> {
        let author = self
            .authors
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Signature {
                name: "stranger".to_string(),
                email: "stranger@example.com".to_string(),
                when: Utc::now(),
            });
        Ok(CommitInfo {
            id: id.to_string(),
            author,
        })
    }

    async fn test_merge(
        &self,
        _repo: &Path,
        _base: &str,
        _head: &str,
        cancel: &CancellationToken,
    ) -> Result<MergeTestOutcome> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                () = cancel.cancelled() => {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::Cancelled);
                }
            }
        }
        tokio::task::yield_now().await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone().map_err(Error::Git)
    }
}

// =============================================================================
// Policy, identity and side-effect collaborators
// =============================================================================

#[derive(Default)]
pub struct MockRules {
    rule: Mutex<Option<BranchProtectionRule>>,
    lookups: AtomicUsize,
}

impl MockRules {
    pub fn set(&self, rule: Option<BranchProtectionRule>) {
        *self.rule.lock().unwrap() = rule;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtectionRules for MockRules {
    async fn first_matching_rule(
        &self,
        _repo_id: i64,
        _branch: &str,
    ) -> Result<Option<BranchProtectionRule>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.rule.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockUsers {
    users: Mutex<Vec<User>>,
    fail: Mutex<bool>,
}

impl MockUsers {
    pub fn add(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Users for MockUsers {
    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        if *self.fail.lock().unwrap() {
            return Err(Error::Store("injected lookup failure".to_string()));
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }
}

pub struct MockPermissions {
    allowed: Mutex<bool>,
    admin: Mutex<bool>,
    admin_checks: AtomicUsize,
}

impl Default for MockPermissions {
    fn default() -> Self {
        Self {
            allowed: Mutex::new(true),
            admin: Mutex::new(false),
            admin_checks: AtomicUsize::new(0),
        }
    }
}

impl MockPermissions {
    pub fn set_allowed(&self, allowed: bool) {
        *self.allowed.lock().unwrap() = allowed;
    }

    pub fn set_admin(&self, admin: bool) {
        *self.admin.lock().unwrap() = admin;
    }

    pub fn admin_checks(&self) -> usize {
        self.admin_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Permissions for MockPermissions {
    async fn is_allowed_to_merge(
        &self,
        _request: &MergeRequest,
        _permission: &Permission,
        _doer: &User,
    ) -> Result<bool> {
        Ok(*self.allowed.lock().unwrap())
    }

    async fn is_repo_admin(&self, _repo: &Repository, _doer: &User) -> Result<bool> {
        self.admin_checks.fetch_add(1, Ordering::SeqCst);
        Ok(*self.admin.lock().unwrap())
    }
}

pub struct MockDependencies {
    none_left: Mutex<bool>,
}

impl Default for MockDependencies {
    fn default() -> Self {
        Self {
            none_left: Mutex::new(true),
        }
    }
}

impl MockDependencies {
    pub fn set_blocked(&self, blocked: bool) {
        *self.none_left.lock().unwrap() = !blocked;
    }
}

#[async_trait]
impl Dependencies for MockDependencies {
    async fn no_dependencies_left(&self, _issue: &Issue) -> Result<bool> {
        Ok(*self.none_left.lock().unwrap())
    }
}

#[derive(Default)]
pub struct MockNotifier {
    merged: Mutex<Vec<(String, MergeRequestId)>>,
}

impl MockNotifier {
    /// (merger name, request id) per notification
    pub fn merged_calls(&self) -> Vec<(String, MergeRequestId)> {
        self.merged.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn merged(&self, merger: &User, request: &MergeRequest) {
        self.merged
            .lock()
            .unwrap()
            .push((merger.name.clone(), request.id));
    }
}

#[derive(Default)]
pub struct MockAutoMerge {
    scheduled: Mutex<HashSet<MergeRequestId>>,
    reevaluated: Mutex<Vec<(MergeRequestId, MergeStatus)>>,
}

impl MockAutoMerge {
    pub fn schedule(&self, id: MergeRequestId) {
        self.scheduled.lock().unwrap().insert(id);
    }

    pub fn reevaluated(&self) -> Vec<(MergeRequestId, MergeStatus)> {
        self.reevaluated.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutoMerge for MockAutoMerge {
    async fn has_scheduled_merge(&self, id: MergeRequestId) -> Result<bool> {
        Ok(self.scheduled.lock().unwrap().contains(&id))
    }

    async fn reevaluate(&self, request: &MergeRequest) -> Result<()> {
        self.reevaluated
            .lock()
            .unwrap()
            .push((request.id, request.status));
        Ok(())
    }
}

pub struct MockSigner {
    signs: Mutex<bool>,
    calls: AtomicUsize,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self {
            signs: Mutex::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockSigner {
    pub fn set_signs(&self, signs: bool) {
        *self.signs.lock().unwrap() = signs;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MergeSigner for MockSigner {
    async fn sign_merge(
        &self,
        _request: &MergeRequest,
        _doer: &User,
        _base_path: &Path,
        _base_branch: &str,
        _head_ref: &str,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.signs.lock().unwrap())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Every mock, with handles kept for assertions
pub struct Mocks {
    pub store: Arc<MockStore>,
    pub git: Arc<MockGit>,
    pub rules: Arc<MockRules>,
    pub users: Arc<MockUsers>,
    pub permissions: Arc<MockPermissions>,
    pub dependencies: Arc<MockDependencies>,
    pub notifier: Arc<MockNotifier>,
    pub auto_merge: Arc<MockAutoMerge>,
    pub signer: Arc<MockSigner>,
}

impl Mocks {
    pub fn new() -> Self {
        Self::with_git(MockGit::new())
    }

    pub fn with_git(git: MockGit) -> Self {
        Self {
            store: Arc::new(MockStore::new()),
            git: Arc::new(git),
            rules: Arc::new(MockRules::default()),
            users: Arc::new(MockUsers::default()),
            permissions: Arc::new(MockPermissions::default()),
            dependencies: Arc::new(MockDependencies::default()),
            notifier: Arc::new(MockNotifier::default()),
            auto_merge: Arc::new(MockAutoMerge::default()),
            signer: Arc::new(MockSigner::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            git: self.git.clone(),
            rules: self.rules.clone(),
            users: self.users.clone(),
            permissions: self.permissions.clone(),
            dependencies: self.dependencies.clone(),
            notifier: self.notifier.clone(),
            auto_merge: self.auto_merge.clone(),
            signer: self.signer.clone(),
        }
    }
}

impl Default for Mocks {
    fn default() -> Self {
        Self::new()
    }
}
