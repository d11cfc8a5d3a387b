//! Mergeability checks
//!
//! Two halves share the [`MergeabilityChecker`]:
//!
//! - the merge gate ([`MergeabilityChecker::check_mergeable`]) decides
//!   whether a doer may merge a request right now
//! - the background check ([`MergeabilityChecker::refresh_status`]) keeps
//!   the persisted status field fresh, run by the queue worker
//!
//! Manual merge detection runs first in the background check so requests
//! merged outside the system are closed out cheaply.

mod background;
mod gate;
mod manual;
mod protection;

pub use manual::ManualMergeDetector;
pub use protection::{evaluate_protection, forgives_protection_failure, protected_files};

use crate::config::PullRequestConfig;
use crate::services::Collaborators;
use crate::types::MergeRequestId;

/// Lock key guarding every check status mutation of one request
pub fn lock_key(id: MergeRequestId) -> String {
    format!("pr_{id}")
}

/// Decision pipeline and background status check
pub struct MergeabilityChecker {
    services: Collaborators,
    config: PullRequestConfig,
    detector: ManualMergeDetector,
}

impl MergeabilityChecker {
    /// Create a checker using `services` for every external lookup
    pub fn new(services: Collaborators, config: PullRequestConfig) -> Self {
        let detector = ManualMergeDetector::new(&services);
        Self {
            services,
            config,
            detector,
        }
    }

    /// Collaborators this checker was built with
    pub fn services(&self) -> &Collaborators {
        &self.services
    }

    /// Manual merge detector
    pub fn detector(&self) -> &ManualMergeDetector {
        &self.detector
    }

    /// Merge request policy in effect
    pub fn config(&self) -> &PullRequestConfig {
        &self.config
    }
}

impl std::fmt::Debug for MergeabilityChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeabilityChecker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
