//! Configuration for the wisp transport and replication stack.
//!
//! Provides settings that persist to disk as RON files, CLI overrides via
//! clap, hot-reload detection, validation, and forward/backward compatible
//! serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, ReplicationConfig, SimConfig, TransportConfig, secs,
};
pub use error::ConfigError;
