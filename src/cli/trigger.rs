//! Trigger commands - queue checks and wait for their results

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, arrow, status};
use anstream::println;
use mergecheck::error::Result;
use mergecheck::services::MergeRequestStore;
use mergecheck::types::{MergeRequest, MergeRequestId};

/// Which trigger to fire for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Queue a check right away
    Immediate,
    /// Queue a check only if the request was active recently
    Delayable,
    /// Queue a deferred check, as when the request page is viewed
    View,
}

/// Fire `trigger` for request `id` and wait for the queue to drain.
pub async fn run_trigger(ctx: &CommandContext, id: MergeRequestId, trigger: Trigger) -> Result<()> {
    let request = ctx.request(id).await?;
    let scheduler = &ctx.scheduler;

    match trigger {
        Trigger::Immediate => scheduler.start_immediately(&request).await?,
        Trigger::Delayable => scheduler.start_delayable(&request).await?,
        Trigger::View => scheduler.start_on_view(&request).await?,
    }

    ctx.drain().await?;
    print_result(&request, &ctx.request(id).await?);
    Ok(())
}

/// Recheck every open request targeting `branch` of `repo_id`.
pub async fn run_base_updated(ctx: &CommandContext, repo_id: i64, branch: &str) -> Result<()> {
    let requests = ctx.state.list_unmerged_by_base(repo_id, branch).await?;
    let scheduled = ctx.scheduler.check_base_branch(repo_id, branch).await?;
    if scheduled == 0 {
        println!("{}", format!("No open merge requests target {branch}").muted());
        return Ok(());
    }

    println!(
        "{} {} merge request(s) targeting {}",
        "Rechecking".emphasis(),
        scheduled,
        branch.accent()
    );
    ctx.drain().await?;

    for before in &requests {
        let after = ctx.request(before.id).await?;
        print_result(before, &after);
    }
    Ok(())
}

fn print_result(before: &MergeRequest, after: &MergeRequest) {
    if before.status == after.status {
        println!("{} {}", after.to_string().accent(), status(after.status));
    } else {
        println!(
            "{} {} {} {}",
            after.to_string().accent(),
            status(before.status),
            arrow(),
            status(after.status)
        );
    }

    if !after.conflicted_files.is_empty() {
        println!("  {}", "Conflicting files:".warn());
        for file in &after.conflicted_files {
            println!("    {file}");
        }
    }
    if !after.changed_protected_files.is_empty() {
        println!("  {}", "Changed protected files:".warn());
        for file in &after.changed_protected_files {
            println!("    {file}");
        }
    }
    if let (Some(commit), Some(merger)) = (&after.merged_commit_id, &after.merger) {
        println!(
            "  {} {} by {}",
            "Merged in".muted(),
            commit.accent(),
            merger.name.accent()
        );
    }
}
