//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration inside a config directory.
pub const CONFIG_FILE_NAME: &str = "wisp.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Reliable transport settings.
    pub transport: TransportConfig,
    /// Replication coordinator settings.
    pub replication: ReplicationConfig,
    /// Simulation driver settings.
    pub sim: SimConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Reliable transport configuration.
///
/// Replaceable between ticks; the transport picks up a new value on its next
/// `update()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Seconds between resends of an unacknowledged reliable message.
    pub resend_interval_secs: f64,
    /// Seconds after the first send at which an unacknowledged reliable
    /// message is discarded and the peer marked faulty.
    pub discard_timeout_secs: f64,
    /// Maximum number of in-flight reliable messages per peer. Must stay
    /// below 256 so that no two in-flight entries share a sequence number.
    pub max_in_flight: usize,
}

/// Replication coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Derive a shared network clock from pings to the primary peer.
    pub time_synchronization: bool,
    /// Push the local state snapshot to remote peers.
    pub send_state: bool,
    /// Offset variance (seconds squared) at or below which the network
    /// clock is considered synchronized.
    pub time_variance_threshold: f64,
    /// Distance at or below which a peer is in the near band.
    pub near_distance: f64,
    /// Distance at or below which a peer still receives full state.
    pub far_distance: f64,
    /// Distance at or beyond which a peer receives no state at all.
    pub furthest_distance: f64,
    /// Seconds between state sends to near peers.
    pub time_until_tx_state_near: f64,
    /// Seconds between state sends to far and distant peers.
    pub time_until_tx_state_far: f64,
    /// Seconds between pings to each peer.
    pub time_until_tx_ping: f64,
}

/// Settings for the `wisp-sim` driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Number of simulated peers (including the primary).
    pub peers: u32,
    /// Simulated run length in seconds.
    pub duration_secs: f64,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Probability that a datagram is dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram jumps ahead of queued ones.
    pub reorder_rate: f64,
    /// Probability that one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Seed for the link-condition RNG.
    pub seed: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn,wisp_transport=trace").
    pub log_level: String,
    /// Seconds between statistics reports in the simulation driver.
    pub report_interval_secs: f64,
}

// --- Default implementations ---

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resend_interval_secs: 1.0,
            discard_timeout_secs: 20.0,
            max_in_flight: 200,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            time_synchronization: true,
            send_state: true,
            time_variance_threshold: 1e-4,
            near_distance: 8.0,
            far_distance: 90.0,
            furthest_distance: 120.0,
            time_until_tx_state_near: 0.1,
            time_until_tx_state_far: 0.3,
            time_until_tx_ping: 1.0,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            duration_secs: 30.0,
            tick_rate: 60,
            loss_rate: 0.05,
            duplicate_rate: 0.02,
            reorder_rate: 0.05,
            corrupt_rate: 0.01,
            seed: 42,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            report_interval_secs: 1.0,
        }
    }
}

// --- Validation ---

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not a finite, non-negative number of seconds"),
        })
    }
}

fn check_rate(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not a probability in [0, 1]"),
        })
    }
}

/// Converts a seconds value from the config into a [`Duration`], rounded to
/// the nearest nanosecond. Negative and non-finite values clamp to zero.
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_nanos((value * 1e9).round() as u64)
    } else {
        Duration::ZERO
    }
}

impl TransportConfig {
    /// Check that the timers are usable and the window fits the 8-bit
    /// sequence space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("transport.resend_interval_secs", self.resend_interval_secs)?;
        check_seconds("transport.discard_timeout_secs", self.discard_timeout_secs)?;
        if self.discard_timeout_secs <= self.resend_interval_secs {
            return Err(ConfigError::Invalid {
                field: "transport.discard_timeout_secs",
                reason: "must be greater than the resend interval".to_string(),
            });
        }
        if !(1..=255).contains(&self.max_in_flight) {
            return Err(ConfigError::Invalid {
                field: "transport.max_in_flight",
                reason: format!("{} is outside 1..=255", self.max_in_flight),
            });
        }
        Ok(())
    }

    /// Resend interval as a [`Duration`].
    pub fn resend_interval(&self) -> Duration {
        secs(self.resend_interval_secs)
    }

    /// Discard deadline as a [`Duration`].
    pub fn discard_timeout(&self) -> Duration {
        secs(self.discard_timeout_secs)
    }
}

impl ReplicationConfig {
    /// Check that the distance bands are ordered and every interval is a
    /// usable number of seconds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("replication.near_distance", self.near_distance)?;
        check_seconds("replication.far_distance", self.far_distance)?;
        check_seconds("replication.furthest_distance", self.furthest_distance)?;
        if self.near_distance > self.far_distance || self.far_distance > self.furthest_distance {
            return Err(ConfigError::Invalid {
                field: "replication.far_distance",
                reason: format!(
                    "bands must satisfy near <= far <= furthest (got {} / {} / {})",
                    self.near_distance, self.far_distance, self.furthest_distance
                ),
            });
        }
        check_seconds(
            "replication.time_until_tx_state_near",
            self.time_until_tx_state_near,
        )?;
        check_seconds(
            "replication.time_until_tx_state_far",
            self.time_until_tx_state_far,
        )?;
        check_seconds("replication.time_until_tx_ping", self.time_until_tx_ping)?;
        check_seconds(
            "replication.time_variance_threshold",
            self.time_variance_threshold,
        )?;
        Ok(())
    }

    /// State cadence for the near band.
    pub fn near_state_interval(&self) -> Duration {
        secs(self.time_until_tx_state_near)
    }

    /// State cadence for the far and distant bands.
    pub fn far_state_interval(&self) -> Duration {
        secs(self.time_until_tx_state_far)
    }

    /// Ping cadence.
    pub fn ping_interval(&self) -> Duration {
        secs(self.time_until_tx_ping)
    }
}

impl SimConfig {
    /// Check peer count, tick rate and link probabilities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers < 2 {
            return Err(ConfigError::Invalid {
                field: "sim.peers",
                reason: "at least two peers are needed".to_string(),
            });
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "sim.tick_rate",
                reason: "must be positive".to_string(),
            });
        }
        check_seconds("sim.duration_secs", self.duration_secs)?;
        check_rate("sim.loss_rate", self.loss_rate)?;
        check_rate("sim.duplicate_rate", self.duplicate_rate)?;
        check_rate("sim.reorder_rate", self.reorder_rate)?;
        check_rate("sim.corrupt_rate", self.corrupt_rate)?;
        Ok(())
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Default configuration directory: `<platform config dir>/wisp`.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wisp"))
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        self.replication.validate()?;
        self.sim.validate()?;
        check_seconds("debug.report_interval_secs", self.debug.report_interval_secs)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `wisp.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
