//! Version control access
//!
//! The checker only needs a handful of history queries plus a merge
//! simulation. [`VersionControl`] is the seam; [`GitCli`] implements it on
//! top of the `git` binary.

mod cli;

pub use cli::GitCli;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Result of an ancestry test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ancestry {
    /// The commit is reachable from the target
    Ancestor,
    /// The commit is not reachable from the target
    NotAncestor,
}

/// Author identity of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Author name
    pub name: String,
    /// Author email
    pub email: String,
    /// Author time
    pub when: DateTime<Utc>,
}

/// Commit metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full commit ID
    pub id: String,
    /// Commit author
    pub author: Signature,
}

/// Result of simulating the merge of head into base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTestOutcome {
    /// Merge base of head and base
    pub merge_base: String,
    /// Paths that conflict; empty if the merge is clean
    pub conflicted_files: Vec<String>,
    /// Paths changed by head since the merge base
    pub changed_files: Vec<String>,
    /// Base commits not contained in head
    pub commits_behind: u32,
}

impl MergeTestOutcome {
    /// Whether merging would conflict
    pub fn is_conflicted(&self) -> bool {
        !self.conflicted_files.is_empty()
    }

    /// Whether head changes nothing relative to the merge base
    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty()
    }
}

/// History queries and merge simulation on a repository
///
/// Every call takes the caller's cancellation token; implementations must
/// stop (and kill any subprocess) when it fires.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Test whether `commit` is an ancestor of `of`.
    ///
    /// "Not an ancestor" is a normal result, not an error.
    async fn is_ancestor(
        &self,
        repo: &Path,
        commit: &str,
        of: &str,
        cancel: &CancellationToken,
    ) -> Result<Ancestry>;

    /// Resolve a revision to its full object ID
    async fn full_commit_id(
        &self,
        repo: &Path,
        rev: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Oldest merge commit on the ancestry path `from..to`, if any.
    ///
    /// Returned as printed by the tool; callers validate the length.
    async fn first_merge_on_ancestry_path(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    /// Fetch commit metadata
    async fn commit_info(
        &self,
        repo: &Path,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo>;

    /// Simulate merging `head` into `base` without touching any worktree
    async fn test_merge(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
        cancel: &CancellationToken,
    ) -> Result<MergeTestOutcome>;
}
