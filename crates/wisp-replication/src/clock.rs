//! Network clock synchronization.
//!
//! Every node keeps its own local clock (the sum of tick lengths) and
//! estimates the offset to the reference node's clock from ping/pong round
//! trips. The raw network time is `local + mean(offset samples)`. A second,
//! compensated clock follows the raw network time but never jumps for small
//! corrections: it slews by at most a tenth of each tick.

use std::time::Duration;

/// Number of offset samples kept in the circular history.
pub const HISTORY_LEN: usize = 32;

/// Samples needed before the variance is trusted.
pub const MIN_SAMPLES: usize = 8;

/// Compensated-clock error (seconds) at which the clock snaps instead of
/// slewing.
pub const HARD_RESET_THRESHOLD: f64 = 0.25;

/// Compensated-clock error (seconds) below which no correction is applied.
pub const SLEW_DEADBAND: f64 = 0.001;

/// Largest correction per tick, as a fraction of the tick length.
pub const MAX_SLEW_FRACTION: f64 = 0.1;

/// Result of [`compute_time_adjustment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAdjustment {
    /// Within tolerance.
    None,
    /// Compensated clock is ahead; advance it slower than real time.
    SlowDown,
    /// Compensated clock is behind; advance it faster than real time.
    SpeedUp,
    /// Too far off to slew; snap to the network time.
    HardReset,
}

/// Decide how to correct the compensated clock given its error in seconds
/// (`compensated - network`).
///
/// - `|error| < SLEW_DEADBAND`: no adjustment
/// - `SLEW_DEADBAND <= |error| < HARD_RESET_THRESHOLD`: slew
/// - `|error| >= HARD_RESET_THRESHOLD`: hard reset
pub fn compute_time_adjustment(error: f64) -> TimeAdjustment {
    if error.abs() >= HARD_RESET_THRESHOLD {
        TimeAdjustment::HardReset
    } else if error >= SLEW_DEADBAND {
        TimeAdjustment::SlowDown
    } else if error <= -SLEW_DEADBAND {
        TimeAdjustment::SpeedUp
    } else {
        TimeAdjustment::None
    }
}

/// Per-coordinator clock state.
#[derive(Debug, Clone)]
pub struct TimeSync {
    local: Duration,
    history: [f64; HISTORY_LEN],
    next: usize,
    filled: usize,
    offset: f64,
    variance: f64,
    compensated: f64,
    synchronized: bool,
    reference: bool,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSync {
    /// A clock at local time zero with no samples.
    pub fn new() -> Self {
        Self {
            local: Duration::ZERO,
            history: [0.0; HISTORY_LEN],
            next: 0,
            filled: 0,
            offset: 0.0,
            variance: f64::MAX,
            compensated: 0.0,
            synchronized: false,
            reference: false,
        }
    }

    /// Back to local time zero, empty history, maximum variance.
    pub fn reset(&mut self) {
        let reference = self.reference;
        *self = Self::new();
        self.reference = reference;
    }

    /// Advance the local clock. Called at the start of a tick so every
    /// timestamp taken during the tick agrees.
    pub fn advance(&mut self, dt: Duration) {
        self.local += dt;
    }

    /// Mark this node as the time reference (or not). Switching discards
    /// the offset history, which was measured against the old reference.
    pub fn set_reference(&mut self, reference: bool) {
        if self.reference != reference {
            self.reference = reference;
            self.history = [0.0; HISTORY_LEN];
            self.next = 0;
            self.filled = 0;
        }
    }

    /// Whether this node is the time reference.
    pub fn is_reference(&self) -> bool {
        self.reference
    }

    /// Push one offset sample (reference clock minus local clock, seconds).
    pub fn record_sample(&mut self, offset: f64) {
        if !offset.is_finite() {
            return;
        }
        self.history[self.next] = offset;
        self.next = (self.next + 1) % HISTORY_LEN;
        self.filled = (self.filled + 1).min(HISTORY_LEN);
    }

    /// Fold this tick's samples into the offset, variance, synchronized
    /// flag, and compensated clock. With synchronization disabled both
    /// clocks follow the local clock.
    pub fn resolve(&mut self, dt: Duration, enabled: bool, variance_threshold: f64) {
        let step = dt.as_secs_f64();
        if !enabled {
            self.offset = 0.0;
            self.compensated = self.local_secs();
            return;
        }

        if self.reference {
            self.record_sample(0.0);
        }

        let samples = &self.history[..self.filled];
        if !samples.is_empty() {
            self.offset = samples.iter().sum::<f64>() / samples.len() as f64;
        }
        self.variance = if self.filled >= MIN_SAMPLES {
            samples
                .iter()
                .map(|sample| (sample - self.offset).powi(2))
                .sum::<f64>()
                / samples.len() as f64
        } else {
            f64::MAX
        };
        if !self.synchronized && self.variance <= variance_threshold {
            self.synchronized = true;
            tracing::info!(
                offset = self.offset,
                variance = self.variance,
                "network time synchronized"
            );
        }

        let network = self.network_secs();
        let predicted = self.compensated + step;
        let error = predicted - network;
        let max_slew = step * MAX_SLEW_FRACTION;
        self.compensated = match compute_time_adjustment(error) {
            TimeAdjustment::None => predicted,
            TimeAdjustment::SlowDown => predicted - error.min(max_slew),
            TimeAdjustment::SpeedUp => predicted + (-error).min(max_slew),
            TimeAdjustment::HardReset => {
                tracing::debug!(error, "compensated network time reset");
                network
            }
        };
    }

    /// Local clock.
    pub fn local(&self) -> Duration {
        self.local
    }

    /// Local clock in seconds.
    pub fn local_secs(&self) -> f64 {
        self.local.as_secs_f64()
    }

    /// Raw network time in seconds: local time plus the mean offset.
    pub fn network_secs(&self) -> f64 {
        self.local_secs() + self.offset
    }

    /// Compensated network time in seconds.
    pub fn compensated_secs(&self) -> f64 {
        self.compensated
    }

    /// Current mean offset to the reference clock.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Variance of the offset history, `f64::MAX` until enough samples.
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Number of samples in the history.
    pub fn sample_count(&self) -> usize {
        self.filled
    }

    /// Whether the variance has dropped to the threshold at least once.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}
