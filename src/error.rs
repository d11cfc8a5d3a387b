//! Error types for mergecheck

use crate::types::MergeRequestId;
use thiserror::Error;

/// Errors produced by the check pipeline and its collaborators.
///
/// The first group are policy failures: named, expected outcomes of
/// [`check_mergeable`](crate::check::MergeabilityChecker::check_mergeable)
/// that callers report to users. Everything else is an execution error.
#[derive(Debug, Error)]
pub enum Error {
    /// The merge request was already merged
    #[error("merge request has already been merged")]
    HasMerged,

    /// The issue behind the merge request is closed
    #[error("merge request is closed")]
    IsClosed,

    /// The doer may not merge into the base branch
    #[error("no permission to merge")]
    NoPermissionToMerge,

    /// The title carries a work-in-progress prefix
    #[error("work in progress merge requests cannot be merged")]
    IsWorkInProgress,

    /// Neither mergeable nor empty
    #[error("not in mergeable state")]
    NotMergeableState,

    /// A background check is still running
    #[error("cannot merge while conflict checking is in progress")]
    IsChecking,

    /// Branch protection is not satisfied
    #[error("not ready to merge: {0}")]
    NotReadyToMerge(String),

    /// An open issue still blocks this merge request
    #[error("merge request is blocked by an open dependency")]
    DependenciesLeft,

    /// Merge request lookup failed
    #[error("merge request {0} not found")]
    NotFound(MergeRequestId),

    /// Git command failed
    #[error("git error: {0}")]
    Git(String),

    /// Persistence layer failure
    #[error("storage error: {0}")]
    Store(String),

    /// Work queue failure
    #[error("queue error: {0}")]
    Queue(String),

    /// Lock acquisition failure
    #[error("lock error: {0}")]
    Lock(String),

    /// Required merge signature could not be produced
    #[error("signing error: {0}")]
    Signing(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The surrounding operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is an expected outcome of the merge gate rather than a
    /// failure of the machinery behind it.
    pub const fn is_policy_failure(&self) -> bool {
        matches!(
            self,
            Self::HasMerged
                | Self::IsClosed
                | Self::NoPermissionToMerge
                | Self::IsWorkInProgress
                | Self::NotMergeableState
                | Self::IsChecking
                | Self::NotReadyToMerge(_)
                | Self::DependenciesLeft
        )
    }
}

/// Result type alias for mergecheck operations
pub type Result<T> = std::result::Result<T, Error>;
