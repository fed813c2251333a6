//! CLI-specific functionality for the `resync-sim` binary
//!
//! Argument parsing, configuration discovery and the scripted
//! suspend/resume simulation.

pub mod args;
pub mod config;
pub mod simulate;

pub use args::{Args, ExecutionMode, SimulationConfig};
pub use config::ConfigDiscovery;
pub use simulate::{CycleReport, SimulationSummary, run_simulation};
