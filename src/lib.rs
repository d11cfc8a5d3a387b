//! mergecheck - background mergeability checks for merge requests
//!
//! Decides whether a merge request can be merged and keeps its persisted
//! status fresh as the base branch moves:
//!
//! - [`scheduler::CheckScheduler`] marks requests `Checking` and queues them
//!   (immediately, delay-aware, on view, or in bulk when a base branch
//!   advances)
//! - [`queue::UniqueQueue`] deduplicates queued checks and survives restarts
//! - [`check::MergeabilityChecker`] runs the merge gate and the background
//!   status check, detecting manual merges first
//! - [`lock::GlobalLock`] serializes all status mutation per request
//!
//! Persistence, permissions, policy and notifications are reached through
//! the traits in [`services`]; [`state::FileState`] implements all of them
//! on a TOML file.

pub mod check;
pub mod config;
pub mod error;
pub mod git;
pub mod lock;
pub mod queue;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod types;

pub use error::{Error, Result};
