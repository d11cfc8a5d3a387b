//! Run command - long-running check service

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check};
use anstream::println;
use mergecheck::error::Result;
use tracing::info;

/// Recover interrupted checks, then consume the queue until Ctrl-C.
pub async fn run_service(ctx: &CommandContext) -> Result<()> {
    ctx.cancel_on_ctrl_c();

    let recovered = ctx.scheduler.recover_on_startup(&ctx.cancel).await?;
    println!(
        "{} Checking merge requests ({} recovered, {} queued). Press Ctrl-C to stop.",
        check(),
        recovered,
        ctx.scheduler.queue().len()
    );

    ctx.scheduler.run(ctx.cancel.clone()).await;

    info!("check service stopped");
    println!("{}", "Stopped".muted());
    Ok(())
}
