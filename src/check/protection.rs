//! Branch protection evaluation - pure functions
//!
//! No I/O happens here: the rule and the request snapshot are passed in,
//! which keeps the policy table-testable.

use crate::error::{Error, Result};
use crate::types::{BranchProtectionRule, MergeCheckType, MergeRequest};
use glob::{MatchOptions, Pattern};
use tracing::warn;

/// Check `request` against `rule`.
///
/// Fails with [`Error::NotReadyToMerge`] naming the first unmet condition.
pub fn evaluate_protection(rule: Option<&BranchProtectionRule>, request: &MergeRequest) -> Result<()> {
    let Some(rule) = rule else {
        return Ok(());
    };

    if rule.enable_status_check && !request.status_checks_passed {
        return Err(Error::NotReadyToMerge(
            "required status checks have not passed".to_string(),
        ));
    }

    if request.approvals < rule.required_approvals {
        return Err(Error::NotReadyToMerge(format!(
            "{} of {} required approvals",
            request.approvals, rule.required_approvals
        )));
    }

    if rule.block_on_rejected_reviews && request.has_rejected_review {
        return Err(Error::NotReadyToMerge(
            "changes were requested by a reviewer".to_string(),
        ));
    }

    if rule.block_on_outdated_branch && request.commits_behind > 0 {
        return Err(Error::NotReadyToMerge(format!(
            "head branch is {} commit(s) behind {}",
            request.commits_behind, request.base_branch
        )));
    }

    if !request.changed_protected_files.is_empty() {
        return Err(Error::NotReadyToMerge(format!(
            "changes protected files: {}",
            request.changed_protected_files.join(", ")
        )));
    }

    Ok(())
}

/// Whether a branch protection failure may be skipped.
///
/// Scheduled merges skip it unconditionally. An admin force merge skips it
/// only if the doer is a repository admin and the rule doesn't block admin
/// overrides.
pub const fn forgives_protection_failure(
    check_type: MergeCheckType,
    admin_force_merge: bool,
    is_repo_admin: bool,
    rule_blocks_admin_override: bool,
) -> bool {
    matches!(check_type, MergeCheckType::Auto)
        || (admin_force_merge && is_repo_admin && !rule_blocks_admin_override)
}

/// Changed files matching the rule's protected file patterns.
///
/// Matching is case-insensitive and `*` does not cross `/`.
pub fn protected_files(rule: Option<&BranchProtectionRule>, changed: &[String]) -> Vec<String> {
    let Some(rule) = rule else {
        return Vec::new();
    };

    let patterns: Vec<Pattern> = rule
        .protected_file_patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(rule = %rule.rule_name, pattern = p, error = %e, "invalid protected file pattern");
                None
            }
        })
        .collect();

    if patterns.is_empty() {
        return Vec::new();
    }

    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    changed
        .iter()
        .filter(|file| patterns.iter().any(|p| p.matches_with(file, options)))
        .cloned()
        .collect()
}
