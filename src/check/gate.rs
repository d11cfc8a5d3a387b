//! The merge gate
//!
//! Decides whether a doer may merge a request right now. Policy failures
//! come back as named [`Error`] variants; see [`Error::is_policy_failure`].

use super::MergeabilityChecker;
use super::protection::{evaluate_protection, forgives_protection_failure};
use crate::error::{Error, Result};
use crate::types::{MergeCheckType, MergeRequest, Permission, User};
use tracing::{debug, info};

impl MergeabilityChecker {
    /// Check whether `doer` may merge `request`.
    ///
    /// The request is reloaded first so every step sees the same stored
    /// snapshot. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns the first policy failure in this order: already merged,
    /// closed, no permission, work in progress, not mergeable, still
    /// checking, branch protection, then open dependencies. Signing and
    /// lookup failures are returned as execution errors.
    pub async fn check_mergeable(
        &self,
        doer: &User,
        permission: &Permission,
        request: &MergeRequest,
        check_type: MergeCheckType,
        admin_force_merge: bool,
    ) -> Result<()> {
        let services = self.services();
        let request = services.store.get_by_id(request.id).await?;

        if request.has_merged {
            return Err(Error::HasMerged);
        }

        if request.issue.is_closed {
            return Err(Error::IsClosed);
        }

        if !services
            .permissions
            .is_allowed_to_merge(&request, permission, doer)
            .await?
        {
            return Err(Error::NoPermissionToMerge);
        }

        if check_type == MergeCheckType::Manually {
            // The doer attests the merge themselves
            debug!(request = %request, doer = %doer.name, "manual merge, skipping remaining checks");
            return Ok(());
        }

        if self.config().is_work_in_progress(&request.issue.title) {
            return Err(Error::IsWorkInProgress);
        }

        if !request.can_auto_merge() && !request.is_empty() {
            return Err(Error::NotMergeableState);
        }

        if request.is_checking() {
            return Err(Error::IsChecking);
        }

        let rule = services
            .rules
            .first_matching_rule(request.base_repo.id, &request.base_branch)
            .await?;

        if let Err(err) = evaluate_protection(rule.as_ref(), &request) {
            let blocks_override = rule.as_ref().is_some_and(|r| r.block_admin_merge_override);
            let is_repo_admin = if admin_force_merge && check_type != MergeCheckType::Auto {
                services.permissions.is_repo_admin(&request.base_repo, doer).await?
            } else {
                false
            };

            if !forgives_protection_failure(check_type, admin_force_merge, is_repo_admin, blocks_override)
            {
                return Err(err);
            }
            info!(
                request = %request,
                doer = %doer.name,
                check_type = %check_type,
                reason = %err,
                "branch protection failure forgiven"
            );
        }

        if let Some(rule) = rule.as_ref().filter(|r| r.require_signed_commits) {
            let signed = services
                .signer
                .sign_merge(
                    &request,
                    doer,
                    &request.base_repo.path,
                    &request.base_branch,
                    &request.head_ref,
                )
                .await?;
            if !signed {
                return Err(Error::Signing(format!(
                    "rule {} requires signed merges but the merge would not be signed",
                    rule.rule_name
                )));
            }
        }

        if !services
            .dependencies
            .no_dependencies_left(&request.issue)
            .await?
        {
            return Err(Error::DependenciesLeft);
        }

        Ok(())
    }
}
