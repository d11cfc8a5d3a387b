//! mergecheck CLI

mod cli;

use clap::{Parser, Subcommand, ValueEnum};
use cli::{CommandContext, GateOptions, Trigger};
use mergecheck::error::Result;
use mergecheck::types::{MergeCheckType, MergeRequestId};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Background mergeability checks for merge requests
#[derive(Parser)]
#[command(name = "mergecheck", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file (defaults to the user data directory)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover interrupted checks and serve the durable check queue until Ctrl-C
    ///
    /// Other commands run the checks they trigger themselves.
    Run,

    /// Check a merge request now and wait for the result
    Check {
        /// Merge request ID
        id: MergeRequestId,

        /// Skip queuing if the request has been inactive past the configured delay
        #[arg(long)]
        delayable: bool,
    },

    /// Queue a deferred check, as when the request is viewed
    View {
        /// Merge request ID
        id: MergeRequestId,
    },

    /// Recheck all open merge requests after their base branch moved
    BaseUpdated {
        /// Base repository ID
        #[arg(long)]
        repo: i64,

        /// Base branch name
        #[arg(long)]
        branch: String,
    },

    /// Decide whether a user may merge a request
    CanMerge {
        /// Merge request ID
        id: MergeRequestId,

        /// Login name of the merging user
        #[arg(long)]
        doer: String,

        /// What the merge is for
        #[arg(long, value_enum, default_value_t = Mode::General)]
        mode: Mode,

        /// Request an admin override of branch protection
        #[arg(long)]
        force: bool,
    },

    /// Show the stored check result of a merge request
    Status {
        /// Merge request ID
        id: MergeRequestId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Merge gate mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Regular merge
    General,
    /// Mark as merged manually
    Manual,
    /// Scheduled merge after checks succeed
    Auto,
}

impl From<Mode> for MergeCheckType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::General => Self::General,
            Mode::Manual => Self::Manually,
            Mode::Auto => Self::Auto,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mergecheck={level}")));

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let serve = matches!(cli.command, Commands::Run);
    let ctx = CommandContext::new(cli.config.as_deref(), cli.state.as_deref(), serve)?;

    match cli.command {
        Commands::Run => cli::run_service(&ctx).await,
        Commands::Check { id, delayable } => {
            ctx.cancel_on_ctrl_c();
            let trigger = if delayable {
                Trigger::Delayable
            } else {
                Trigger::Immediate
            };
            cli::run_trigger(&ctx, id, trigger).await
        }
        Commands::View { id } => {
            ctx.cancel_on_ctrl_c();
            cli::run_trigger(&ctx, id, Trigger::View).await
        }
        Commands::BaseUpdated { repo, branch } => {
            ctx.cancel_on_ctrl_c();
            cli::run_base_updated(&ctx, repo, &branch).await
        }
        Commands::CanMerge {
            id,
            doer,
            mode,
            force,
        } => {
            let options = GateOptions {
                doer,
                check_type: mode.into(),
                force,
            };
            cli::run_can_merge(&ctx, id, options).await
        }
        Commands::Status { id, json } => cli::run_status(&ctx, id, json).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            anstream::eprintln!("{} {e}", cli::style::cross());
            ExitCode::FAILURE
        }
    }
}
