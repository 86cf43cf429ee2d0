//! Per-peer latency tracking and mesh-wide aggregates.

use std::time::Duration;

/// EWMA smoothing factor for latency samples.
pub const LATENCY_ALPHA: f64 = 0.125;

/// Slack, in seconds, allowed between the stamped legs and the measured
/// round trip.
const SPLIT_TOLERANCE: f64 = 0.001;

/// Smoothed one-way latencies to and from one peer.
///
/// "Forward" is this node to the peer (ping out), "reverse" is the peer
/// back to this node (pong in).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyTracker {
    forward: Option<Duration>,
    reverse: Option<Duration>,
    rtt: Option<Duration>,
    samples: u64,
}

fn ewma(current: Option<Duration>, sample: Duration) -> Duration {
    match current {
        None => sample,
        Some(current) => {
            let smoothed = LATENCY_ALPHA * sample.as_secs_f64()
                + (1.0 - LATENCY_ALPHA) * current.as_secs_f64();
            Duration::from_secs_f64(smoothed.max(0.0))
        }
    }
}

impl LatencyTracker {
    /// Fold in one completed round trip. The first sample is taken as is.
    pub fn record(&mut self, forward: Duration, reverse: Duration, rtt: Duration) {
        self.forward = Some(ewma(self.forward, forward));
        self.reverse = Some(ewma(self.reverse, reverse));
        self.rtt = Some(ewma(self.rtt, rtt));
        self.samples += 1;
    }

    /// Split a round trip into one-way latencies.
    ///
    /// With synchronized clocks the split comes from the network-time
    /// stamps. Otherwise, or when the stamped legs do not fit inside the
    /// round trip, each leg is half the round trip.
    pub fn split(rtt: f64, forward: Option<f64>, reverse: Option<f64>) -> (Duration, Duration) {
        let fits = |leg: f64| leg.is_finite() && leg >= 0.0 && leg <= rtt + SPLIT_TOLERANCE;
        if let Some((forward, reverse)) = forward.zip(reverse)
            && fits(forward)
            && fits(reverse)
            && forward + reverse <= rtt + SPLIT_TOLERANCE
            && let (Ok(forward), Ok(reverse)) = (
                Duration::try_from_secs_f64(forward),
                Duration::try_from_secs_f64(reverse),
            )
        {
            return (forward, reverse);
        }
        let half = Duration::try_from_secs_f64(rtt / 2.0).unwrap_or(Duration::ZERO);
        (half, half)
    }

    /// Smoothed forward latency, if any round trip completed.
    pub fn forward(&self) -> Option<Duration> {
        self.forward
    }

    /// Smoothed reverse latency, if any round trip completed.
    pub fn reverse(&self) -> Option<Duration> {
        self.reverse
    }

    /// Smoothed round-trip time, if any round trip completed.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Completed round trips.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Aggregate over every peer with at least one completed round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Peers that contributed.
    pub peers: usize,
    /// Mean forward latency.
    pub average: Duration,
    /// Lowest forward latency.
    pub best: Duration,
    /// Highest forward latency.
    pub worst: Duration,
    /// Mean reverse latency.
    pub reverse_average: Duration,
    /// Lowest reverse latency.
    pub reverse_best: Duration,
    /// Highest reverse latency.
    pub reverse_worst: Duration,
}

impl LatencyStats {
    /// Aggregate `trackers`, skipping those without samples. `None` if no
    /// tracker has any.
    pub fn collect<'a>(trackers: impl IntoIterator<Item = &'a LatencyTracker>) -> Option<Self> {
        let pairs: Vec<(Duration, Duration)> = trackers
            .into_iter()
            .filter_map(|tracker| Some((tracker.forward?, tracker.reverse?)))
            .collect();
        let peers = pairs.len();
        if peers == 0 {
            return None;
        }

        let forward = pairs.iter().map(|(forward, _)| *forward);
        let reverse = pairs.iter().map(|(_, reverse)| *reverse);
        Some(Self {
            peers,
            average: mean(forward.clone(), peers),
            best: forward.clone().min()?,
            worst: forward.max()?,
            reverse_average: mean(reverse.clone(), peers),
            reverse_best: reverse.clone().min()?,
            reverse_worst: reverse.max()?,
        })
    }
}

// Summed as u128 nanoseconds; `Sum<Duration>` panics on overflow.
fn mean(values: impl Iterator<Item = Duration>, count: usize) -> Duration {
    let total: u128 = values.map(|value| value.as_nanos()).sum();
    let nanos = total / count.max(1) as u128;
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}
