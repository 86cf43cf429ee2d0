//! Command-line argument parsing for the wisp simulation driver.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// wisp command-line arguments.
///
/// CLI values override settings loaded from `wisp.ron`.
#[derive(Parser, Debug)]
#[command(name = "wisp-sim", about = "Simulate wisp peers over a lossy network")]
pub struct CliArgs {
    /// Number of simulated peers.
    #[arg(long)]
    pub peers: Option<u32>,

    /// Simulated run length in seconds.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Datagram loss probability (0.0 - 1.0).
    #[arg(long)]
    pub loss: Option<f64>,

    /// Datagram duplication probability (0.0 - 1.0).
    #[arg(long)]
    pub duplicate: Option<f64>,

    /// Seed for the simulated link conditions.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(peers) = args.peers {
            self.sim.peers = peers;
        }
        if let Some(duration) = args.duration {
            self.sim.duration_secs = duration;
        }
        if let Some(loss) = args.loss {
            self.sim.loss_rate = loss;
        }
        if let Some(duplicate) = args.duplicate {
            self.sim.duplicate_rate = duplicate;
        }
        if let Some(seed) = args.seed {
            self.sim.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
