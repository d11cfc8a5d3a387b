//! Command-line interface

pub mod context;
pub mod gate;
pub mod run;
pub mod status;
pub mod style;
pub mod trigger;

pub use context::CommandContext;
pub use gate::{GateOptions, run_can_merge};
pub use run::run_service;
pub use status::run_status;
pub use trigger::{Trigger, run_base_updated, run_trigger};
