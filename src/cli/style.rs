//! Terminal styling helpers
//!
//! Colors go through `owo-colors` and are stripped by `anstream` when the
//! output isn't a terminal.

use mergecheck::types::MergeStatus;
use owo_colors::OwoColorize;
use std::fmt::Display;

/// Check mark
pub const CHECK: &str = "✓";

/// Cross mark
pub const CROSS: &str = "✗";

/// Semantic styles for CLI output
pub trait Stylize: Display + Sized {
    /// Headings and important values
    fn emphasis(&self) -> String {
        self.bold().to_string()
    }

    /// Secondary information
    fn muted(&self) -> String {
        self.dimmed().to_string()
    }

    /// Identifiers (ids, branches, users)
    fn accent(&self) -> String {
        self.cyan().to_string()
    }

    /// Positive outcomes
    fn success(&self) -> String {
        self.green().to_string()
    }

    /// Warnings and blocked outcomes
    fn warn(&self) -> String {
        self.yellow().to_string()
    }

    /// Failures
    fn failure(&self) -> String {
        self.red().to_string()
    }
}

impl<T: Display> Stylize for T {}

/// Green check mark
pub fn check() -> String {
    CHECK.success()
}

/// Dimmed arrow for transitions
pub fn arrow() -> String {
    "→".muted()
}

/// Red cross mark
pub fn cross() -> String {
    CROSS.failure()
}

/// Status colored by outcome
pub fn status(status: MergeStatus) -> String {
    match status {
        MergeStatus::Mergeable | MergeStatus::Merged | MergeStatus::ManuallyMerged => {
            status.success()
        }
        MergeStatus::Conflicted | MergeStatus::Error => status.failure(),
        MergeStatus::Checking | MergeStatus::Empty => status.warn(),
        MergeStatus::None => status.muted(),
    }
}
