//! Distance bands: how urgently a peer needs this node's state, based on
//! the distance between the two origins.

use std::time::Duration;

use glam::DVec3;
use wisp_config::ReplicationConfig;

/// Classification of a remote peer by distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceBand {
    /// At or below `near_distance`: full state at the near cadence. Also
    /// used while a peer's origin is still unknown.
    #[default]
    Near,
    /// Above `near_distance`, at or below `far_distance`: full state at the
    /// far cadence.
    Far,
    /// Above `far_distance`, below `furthest_distance`: origin only, at the
    /// far cadence.
    Distant,
    /// At or beyond `furthest_distance`: nothing.
    OutOfRange,
}

impl DistanceBand {
    /// Interval between state sends, or `None` if no state is sent.
    pub fn state_interval(self, config: &ReplicationConfig) -> Option<Duration> {
        match self {
            DistanceBand::Near => Some(config.near_state_interval()),
            DistanceBand::Far | DistanceBand::Distant => Some(config.far_state_interval()),
            DistanceBand::OutOfRange => None,
        }
    }

    /// Whether state sends in this band carry the snapshot.
    pub fn sends_snapshot(self) -> bool {
        matches!(self, DistanceBand::Near | DistanceBand::Far)
    }
}

/// The three configured band edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceBands {
    /// Upper edge (inclusive) of [`DistanceBand::Near`].
    pub near: f64,
    /// Upper edge (inclusive) of [`DistanceBand::Far`].
    pub far: f64,
    /// Distance at which peers become [`DistanceBand::OutOfRange`].
    pub furthest: f64,
}

impl DistanceBands {
    /// Band edges from the replication config.
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            near: config.near_distance,
            far: config.far_distance,
            furthest: config.furthest_distance,
        }
    }

    /// Classify a distance. Checked from the outside in, so a peer exactly
    /// at `furthest` is out of range even when `far == furthest`. A NaN
    /// distance is out of range.
    pub fn classify(&self, distance: f64) -> DistanceBand {
        if distance.is_nan() || distance >= self.furthest {
            DistanceBand::OutOfRange
        } else if distance <= self.near {
            DistanceBand::Near
        } else if distance <= self.far {
            DistanceBand::Far
        } else {
            DistanceBand::Distant
        }
    }

    /// Band of a peer at `remote` as seen from `local`. An unknown remote
    /// origin is treated as near.
    pub fn classify_origins(&self, local: DVec3, remote: Option<DVec3>) -> DistanceBand {
        match remote {
            Some(remote) => self.classify(local.distance(remote)),
            None => DistanceBand::Near,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> DistanceBands {
        DistanceBands::from_config(&ReplicationConfig::default())
    }

    #[test]
    fn test_band_edges() {
        let bands = bands();
        assert_eq!(bands.classify(0.0), DistanceBand::Near);
        assert_eq!(bands.classify(8.0), DistanceBand::Near);
        assert_eq!(bands.classify(8.001), DistanceBand::Far);
        assert_eq!(bands.classify(90.0), DistanceBand::Far);
        assert_eq!(bands.classify(90.5), DistanceBand::Distant);
        assert_eq!(bands.classify(119.999), DistanceBand::Distant);
        assert_eq!(bands.classify(120.0), DistanceBand::OutOfRange);
        assert_eq!(bands.classify(1e9), DistanceBand::OutOfRange);
        assert_eq!(bands.classify(f64::NAN), DistanceBand::OutOfRange);
    }

    #[test]
    fn test_furthest_wins_when_edges_coincide() {
        let bands = DistanceBands {
            near: 10.0,
            far: 50.0,
            furthest: 50.0,
        };
        assert_eq!(bands.classify(50.0), DistanceBand::OutOfRange);
        assert_eq!(bands.classify(49.0), DistanceBand::Far);
    }

    #[test]
    fn test_unknown_origin_is_near() {
        let bands = bands();
        assert_eq!(
            bands.classify_origins(DVec3::new(500.0, 0.0, 0.0), None),
            DistanceBand::Near
        );
        assert_eq!(
            bands.classify_origins(DVec3::ZERO, Some(DVec3::new(0.0, 50.0, 0.0))),
            DistanceBand::Far
        );
    }

    #[test]
    fn test_intervals_per_band() {
        let config = ReplicationConfig::default();
        assert_eq!(
            DistanceBand::Near.state_interval(&config),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            DistanceBand::Far.state_interval(&config),
            Some(Duration::from_millis(300))
        );
        assert_eq!(
            DistanceBand::Distant.state_interval(&config),
            Some(Duration::from_millis(300))
        );
        assert_eq!(DistanceBand::OutOfRange.state_interval(&config), None);
    }

    #[test]
    fn test_snapshot_only_within_far() {
        assert!(DistanceBand::Near.sends_snapshot());
        assert!(DistanceBand::Far.sends_snapshot());
        assert!(!DistanceBand::Distant.sends_snapshot());
        assert!(!DistanceBand::OutOfRange.sends_snapshot());
    }
}
