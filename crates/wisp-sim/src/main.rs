//! `wisp-sim`: run a simulated mesh and log sync, latency and transport
//! statistics.
//!
//! Run with: `cargo run -p wisp-sim -- --peers 4 --loss 0.2`

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use wisp_config::{CliArgs, Config};
use wisp_sim::Scenario;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().or_else(Config::default_dir);

    // Load or create config, then apply CLI overrides
    let mut config = match &config_dir {
        Some(dir) => Config::load_or_create(dir).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.as_ref().map(|dir| dir.join("logs"));
    wisp_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    info!(
        peers = config.sim.peers,
        duration = config.sim.duration_secs,
        tick_rate = config.sim.tick_rate,
        "wisp-sim starting"
    );

    let result = Scenario::new(&config).and_then(|mut scenario| scenario.run());
    match result {
        Ok(summary) => {
            summary.log();
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
