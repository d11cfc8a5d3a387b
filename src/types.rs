//! Core types for mergecheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Merge request identifier
pub type MergeRequestId = i64;

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// User ID
    pub id: i64,
    /// Login name
    pub name: String,
    /// Primary email address
    pub email: String,
}

/// Hash algorithm of a repository's object store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFormat {
    /// SHA-1 object ids (40 hex digits)
    #[default]
    Sha1,
    /// SHA-256 object ids (64 hex digits)
    Sha256,
}

impl ObjectFormat {
    /// Length of a full hex object id in this format
    pub const fn full_length(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }
}

/// The base repository of a merge request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    /// Repository ID
    pub id: i64,
    /// Repository name
    pub name: String,
    /// Repository owner
    pub owner: User,
    /// Path of the bare repository on disk
    pub path: PathBuf,
    /// Object id format of the repository
    pub object_format: ObjectFormat,
    /// Pull request unit setting: detect merges made outside the system
    pub autodetect_manual_merge: bool,
}

/// The issue (conversation thread) backing a merge request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Issue ID
    pub id: i64,
    /// Title shown for the merge request
    pub title: String,
    /// Whether the issue is closed
    pub is_closed: bool,
    /// Time of last activity
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Merge request
// =============================================================================

/// Mergeability status of a merge request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Never checked
    #[default]
    None,
    /// A check is scheduled or running
    Checking,
    /// Merges cleanly
    Mergeable,
    /// Merging would conflict
    Conflicted,
    /// The check itself failed
    Error,
    /// Head introduces no change against the base
    Empty,
    /// Merged by this system
    Merged,
    /// Merged outside this system and detected afterwards
    ManuallyMerged,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Checking => write!(f, "checking"),
            Self::Mergeable => write!(f, "mergeable"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::Error => write!(f, "error"),
            Self::Empty => write!(f, "empty"),
            Self::Merged => write!(f, "merged"),
            Self::ManuallyMerged => write!(f, "manually merged"),
        }
    }
}

/// A proposal to merge a head reference into a base branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeRequest {
    /// Merge request ID
    pub id: MergeRequestId,
    /// Per-repository number
    pub index: u64,
    /// Backing issue
    pub issue: Issue,
    /// Repository the request merges into
    pub base_repo: Repository,
    /// Branch the request merges into
    pub base_branch: String,
    /// Branch the request merges from
    pub head_branch: String,
    /// Reference of the head inside the base repository
    pub head_ref: String,
    /// Current mergeability status
    pub status: MergeStatus,
    /// Merge base of head and base, once computed
    pub merge_base: Option<String>,
    /// Files that conflict when merging
    pub conflicted_files: Vec<String>,
    /// Changed files matching protected file patterns
    pub changed_protected_files: Vec<String>,
    /// Number of base commits missing from head
    pub commits_behind: u32,
    /// Number of approving reviews
    pub approvals: u32,
    /// Whether a review requested changes
    pub has_rejected_review: bool,
    /// Whether the required commit status checks succeeded
    pub status_checks_passed: bool,
    /// Whether the request has been merged
    pub has_merged: bool,
    /// Merge commit ID, once merged
    pub merged_commit_id: Option<String>,
    /// Merge time, once merged
    pub merged_at: Option<DateTime<Utc>>,
    /// Who merged the request
    pub merger: Option<User>,
}

impl MergeRequest {
    /// Default head reference for a request number
    pub fn default_head_ref(index: u64) -> String {
        format!("refs/pull/{index}/head")
    }

    /// Token identifying this request in the check queue
    pub fn queue_token(&self) -> String {
        self.id.to_string()
    }

    /// Whether the last background check found the request mergeable
    pub fn can_auto_merge(&self) -> bool {
        self.status == MergeStatus::Mergeable
    }

    /// Whether the head has no changes relative to the base
    pub fn is_empty(&self) -> bool {
        self.status == MergeStatus::Empty
    }

    /// Whether a background check is scheduled or running
    pub fn is_checking(&self) -> bool {
        self.status == MergeStatus::Checking
    }

    /// Copy recorded merge metadata onto this request
    pub fn apply_merge(&mut self, record: &MergeRecord) {
        self.has_merged = true;
        self.status = record.status;
        self.merged_commit_id = Some(record.commit_id.clone());
        self.merged_at = Some(record.merged_at);
        self.merger = Some(record.merger.clone());
    }
}

impl std::fmt::Display for MergeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MR[{}]#{} {}:{}",
            self.id, self.index, self.base_repo.name, self.base_branch
        )
    }
}

/// Persisted columns of a merge request written by checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// `status`
    Status,
    /// `merge_base`
    MergeBase,
    /// `conflicted_files`
    ConflictedFiles,
    /// `changed_protected_files`
    ChangedProtectedFiles,
    /// `commits_behind`
    CommitsBehind,
}

/// Merge metadata recorded when a request is found merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    /// Merge (or fast-forward) commit ID
    pub commit_id: String,
    /// When the merge happened
    pub merged_at: DateTime<Utc>,
    /// Who is credited with the merge
    pub merger: User,
    /// Resulting status
    pub status: MergeStatus,
}

// =============================================================================
// Policy types
// =============================================================================

/// Branch protection policy for a base branch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct BranchProtectionRule {
    /// Rule name (branch name or pattern)
    pub rule_name: String,
    /// Repository admins may not force-merge past this rule
    pub block_admin_merge_override: bool,
    /// Merges into the branch must be signed
    pub require_signed_commits: bool,
    /// Number of approving reviews required
    pub required_approvals: u32,
    /// A review requesting changes blocks merging
    pub block_on_rejected_reviews: bool,
    /// Head must contain every base commit
    pub block_on_outdated_branch: bool,
    /// Commit status checks must pass
    pub enable_status_check: bool,
    /// Glob patterns of files that may not be changed
    pub protected_file_patterns: Vec<String>,
}

/// Access level of a user on a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// No access
    #[default]
    None,
    /// Read access
    Read,
    /// Write access
    Write,
    /// Repository administrator
    Admin,
    /// Repository owner
    Owner,
}

/// Permission snapshot of the doer, computed by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permission {
    /// Effective access mode on the base repository
    pub access_mode: AccessMode,
}

/// What the merge gate is evaluated for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeCheckType {
    /// Regular merge, rebase or squash
    #[default]
    General,
    /// "Mark as merged manually": the doer attests the merge
    Manually,
    /// Scheduled merge firing after checks succeed
    Auto,
}

impl std::fmt::Display for MergeCheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Manually => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
        }
    }
}
