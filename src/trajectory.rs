// Filter output: append-only sequence of timestamped estimates

use serde::{Deserialize, Serialize};

use crate::kalman::StateEstimate;

/// One timestamped estimate
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    pub timestamp: f64,
    pub estimate: StateEstimate,
}

/// Flat, serializable form of a trajectory point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub timestamp: f64,
    pub mean: Vec<f64>,
    /// Row-major covariance
    pub covariance: Vec<f64>,
}

impl From<&TrajectoryPoint> for TrajectoryRecord {
    fn from(point: &TrajectoryPoint) -> Self {
        let cov = &point.estimate.covariance;
        TrajectoryRecord {
            timestamp: point.timestamp,
            mean: point.estimate.mean.iter().copied().collect(),
            covariance: cov.transpose().iter().copied().collect(),
        }
    }
}

/// Estimates in non-decreasing timestamp order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterTrajectory {
    points: Vec<TrajectoryPoint>,
}

impl FilterTrajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an estimate. Timestamps must not go backwards.
    pub fn push(&mut self, timestamp: f64, estimate: StateEstimate) {
        debug_assert!(
            self.points.last().map_or(true, |p| p.timestamp <= timestamp),
            "trajectory timestamp went backwards"
        );
        self.points.push(TrajectoryPoint { timestamp, estimate });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&TrajectoryPoint> {
        self.points.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrajectoryPoint> {
        self.points.iter()
    }
}

impl<'a> IntoIterator for &'a FilterTrajectory {
    type Item = &'a TrajectoryPoint;
    type IntoIter = std::slice::Iter<'a, TrajectoryPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
