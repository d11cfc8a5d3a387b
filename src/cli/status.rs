//! Status command - show the stored check result of a request

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, status};
use anstream::println;
use mergecheck::error::{Error, Result};
use mergecheck::types::MergeRequestId;

/// Run the status command
pub async fn run_status(ctx: &CommandContext, id: MergeRequestId, json: bool) -> Result<()> {
    let request = ctx.request(id).await?;

    if json {
        let out = serde_json::to_string_pretty(&request)
            .map_err(|e| Error::Internal(format!("failed to serialize request: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    println!("{}", request.issue.title.emphasis());
    println!("  {} {}", "Request:".muted(), request.to_string().accent());
    println!(
        "  {} {} {} {}",
        "Branches:".muted(),
        request.head_branch.accent(),
        "into".muted(),
        request.base_branch.accent()
    );
    println!("  {} {}", "Status:".muted(), status(request.status));

    if let Some(base) = &request.merge_base {
        println!("  {} {}", "Merge base:".muted(), base);
    }
    if request.commits_behind > 0 {
        println!(
            "  {} {}",
            "Behind:".muted(),
            format!("{} commit(s)", request.commits_behind).warn()
        );
    }
    if !request.conflicted_files.is_empty() {
        println!(
            "  {} {}",
            "Conflicts:".muted(),
            request.conflicted_files.join(", ").failure()
        );
    }
    if !request.changed_protected_files.is_empty() {
        println!(
            "  {} {}",
            "Protected:".muted(),
            request.changed_protected_files.join(", ").warn()
        );
    }
    if request.has_merged {
        let commit = request.merged_commit_id.as_deref().unwrap_or("unknown");
        let merger = request.merger.as_ref().map_or("unknown", |u| u.name.as_str());
        println!(
            "  {} {} by {}",
            "Merged:".muted(),
            commit.accent(),
            merger.accent()
        );
    }
    Ok(())
}
