//! Can-merge command - evaluate the merge gate for a doer

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check};
use anstream::println;
use mergecheck::error::{Error, Result};
use mergecheck::types::{MergeCheckType, MergeRequestId};

/// Options for the can-merge command
#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Login name of the user attempting the merge
    pub doer: String,
    /// What the merge is for
    pub check_type: MergeCheckType,
    /// Ask for an admin override of branch protection
    pub force: bool,
}

/// Run the can-merge command
///
/// A policy failure is returned so the process exits non-zero.
pub async fn run_can_merge(ctx: &CommandContext, id: MergeRequestId, options: GateOptions) -> Result<()> {
    let request = ctx.request(id).await?;
    let doer = ctx
        .state
        .user_by_name(&options.doer)
        .ok_or_else(|| Error::Store(format!("user {} not found", options.doer)))?;
    let permission = ctx.state.permission_for(&request, &doer);

    ctx.scheduler
        .checker()
        .check_mergeable(&doer, &permission, &request, options.check_type, options.force)
        .await?;

    println!(
        "{} {} can be merged by {} ({} merge)",
        check(),
        request.to_string().accent(),
        doer.name.accent(),
        options.check_type
    );
    Ok(())
}
