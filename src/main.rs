use anyhow::{Context, Result};
use session_resync::cli::{
    Args, ConfigDiscovery, ExecutionMode, SimulationConfig, SimulationSummary, run_simulation,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose() {
        "session_resync=debug"
    } else {
        "session_resync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Simulate(config) => run_simulate_mode(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            let config = ConfigDiscovery::discover_config()?;
            println!();
            println!("Effective configuration:");
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
        ExecutionMode::InitConfig { path, force } => {
            let path = ConfigDiscovery::create_default_config(path.as_deref(), force)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn run_simulate_mode(options: SimulationConfig) -> Result<()> {
    let config = ConfigDiscovery::load(options.config_override.as_deref())?;
    let workspace = match &options.workspace_override {
        Some(workspace) => workspace.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    info!(
        cycles = options.cycles,
        failure_rate = options.failure_rate,
        "Starting simulation"
    );
    let summary = match run_simulation(config, &options, &workspace).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            return Err(e);
        }
    };

    if options.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to encode summary")?;
        println!("{}", json);
    } else {
        print_summary(&summary, options.verbose);
    }
    Ok(())
}

fn print_summary(summary: &SimulationSummary, verbose: bool) {
    println!("Simulation summary");
    println!("==================");
    for cycle in &summary.cycles {
        println!(
            "  cycle {:>2}: {:?} in {}ms{}",
            cycle.cycle,
            cycle.outcome,
            cycle.duration.as_millis(),
            if cycle.offline { " (offline)" } else { "" }
        );
    }
    println!(
        "  completed: {}/{}",
        summary.completed_cycles(),
        summary.cycles.len()
    );
    println!(
        "  writes:    {} applied, {} failed",
        summary.writes_applied, summary.writes_failed
    );
    println!(
        "  loads:     {} requested, {} coalesced",
        summary.single_flight.total_requests, summary.single_flight.coalesced_requests
    );

    if verbose {
        println!();
        println!("Circuit breakers:");
        for (resource, breaker) in &summary.circuit_breakers {
            println!(
                "  {:<20} {:?} (failures: {})",
                resource, breaker.state, breaker.failure_count
            );
        }
        println!();
        println!("Events:");
        for (name, count) in &summary.events {
            println!("  {:<20} {}", name, count);
        }
    }
}
