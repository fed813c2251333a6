//! Command line argument parsing
//!
//! Subcommands:
//! - `simulate`: run suspend/resume cycles against the simulated backend
//! - `show-config`: show configuration discovery information
//! - `init-config`: write a configuration file with the built-in defaults

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ExecutionMode {
    Simulate(SimulationConfig),
    ShowConfig,
    InitConfig { path: Option<PathBuf>, force: bool },
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub config_override: Option<PathBuf>,
    pub workspace_override: Option<PathBuf>,
    pub cycles: u32,
    /// How long the app stays in the background each cycle.
    pub suspend: Duration,
    /// Probability that any single resource load fails with a 503.
    pub failure_rate: f64,
    /// Freeze every transport handle while suspended.
    pub freeze_on_suspend: bool,
    /// Cycles (1-based) during which the backend is unreachable.
    pub offline_cycles: Vec<u32>,
    pub writes_per_cycle: u32,
    pub verbose: bool,
    pub json: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            config_override: None,
            workspace_override: None,
            cycles: 3,
            suspend: Duration::from_secs(1),
            failure_rate: 0.0,
            freeze_on_suspend: false,
            offline_cycles: Vec::new(),
            writes_per_cycle: 1,
            verbose: false,
            json: false,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "resync-sim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive the session resync core through simulated suspend/resume cycles")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run suspend/resume cycles against a simulated backend
    Simulate {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Workspace directory (file store lives under .resync/store)
        #[arg(short = 'w', long = "workspace")]
        workspace: Option<PathBuf>,
        /// Number of background/resume cycles
        #[arg(long = "cycles", default_value_t = 3)]
        cycles: u32,
        /// Time spent in the background per cycle, in milliseconds
        #[arg(long = "suspend-ms", default_value_t = 1000)]
        suspend_ms: u64,
        /// Probability (0.0-1.0) that a resource load fails
        #[arg(long = "failure-rate", default_value_t = 0.0)]
        failure_rate: f64,
        /// Freeze transport handles while suspended
        #[arg(long = "freeze")]
        freeze: bool,
        /// Make the backend unreachable during this cycle (repeatable)
        #[arg(long = "offline-cycle", value_name = "CYCLE")]
        offline_cycles: Vec<u32>,
        /// Writes enqueued before each suspend
        #[arg(long = "writes", default_value_t = 1)]
        writes: u32,
        /// Print the summary as JSON
        #[arg(long = "json")]
        json: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write the default configuration to a file
    InitConfig {
        /// Target path (defaults to ~/.resync/config.toml)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Simulate {
                config,
                workspace,
                cycles,
                suspend_ms,
                failure_rate,
                freeze,
                offline_cycles,
                writes,
                json,
                verbose,
            }) => {
                if *cycles == 0 {
                    return Err("--cycles must be at least 1".to_string());
                }
                if !(0.0..=1.0).contains(failure_rate) {
                    return Err(format!(
                        "--failure-rate must be between 0.0 and 1.0, got {}",
                        failure_rate
                    ));
                }

                Ok(ExecutionMode::Simulate(SimulationConfig {
                    config_override: config.clone(),
                    workspace_override: workspace.clone(),
                    cycles: *cycles,
                    suspend: Duration::from_millis(*suspend_ms),
                    failure_rate: *failure_rate,
                    freeze_on_suspend: *freeze,
                    offline_cycles: offline_cycles.clone(),
                    writes_per_cycle: *writes,
                    verbose: *verbose,
                    json: *json,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig { path, force }) => Ok(ExecutionMode::InitConfig {
                path: path.clone(),
                force: *force,
            }),
            None => Err(
                "No command specified. Use 'resync-sim --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    /// Whether verbose logging was requested.
    pub fn verbose(&self) -> bool {
        matches!(self.command, Some(Commands::Simulate { verbose: true, .. }))
    }
}
