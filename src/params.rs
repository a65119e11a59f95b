// Fixed run parameters for the fusion filter

use std::fmt;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_ACCURACY_DIVISOR, DEFAULT_CENTER_WEIGHT, DEFAULT_INITIAL_COVARIANCE,
    DEFAULT_PROCESS_NOISE, DEFAULT_STREAM_PRIORITY, DEFAULT_WHEELBASE,
};
use crate::error::FilterError;
use crate::kalman::{StateEstimate, UnscentedParams, STATE_DIM};
use crate::model::{BicycleModel, NoiseMatrices, NoiseModel};
use crate::sensors::{PositionFix, StreamKind};

/// Order in which streams win when their next records share a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPriority([StreamKind; 3]);

impl Default for StreamPriority {
    fn default() -> Self {
        Self(DEFAULT_STREAM_PRIORITY)
    }
}

impl StreamPriority {
    /// `order` must name each stream exactly once, highest priority first
    pub fn new(order: [StreamKind; 3]) -> Result<Self, FilterError> {
        for kind in StreamKind::ALL {
            if !order.contains(&kind) {
                return Err(FilterError::invalid(
                    "priority",
                    format!("stream {} missing from priority order", kind),
                ));
            }
        }
        Ok(Self(order))
    }

    /// 0 is the highest priority
    pub fn rank(&self, kind: StreamKind) -> usize {
        self.0.iter().position(|k| *k == kind).unwrap_or(self.0.len())
    }
}

impl fmt::Display for StreamPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for StreamPriority {
    type Err = FilterError;

    /// Parse "position,speed,steering"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = s
            .split(',')
            .map(str::parse::<StreamKind>)
            .collect::<Result<Vec<_>, _>>()?;
        let order: [StreamKind; 3] = kinds.try_into().map_err(|v: Vec<StreamKind>| {
            FilterError::invalid("priority", format!("expected 3 streams, got {}", v.len()))
        })?;
        Self::new(order)
    }
}

/// Parameters fixed for the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    /// Vehicle wheelbase (m)
    pub wheelbase: f64,
    /// Diagonal of the process noise Q
    pub process_noise: [f64; STATE_DIM],
    /// Diagonal of the initial covariance
    pub initial_covariance: [f64; STATE_DIM],
    /// Reported accuracy divisor k in sigma = accuracy / 1000 / k
    pub accuracy_divisor: f64,
    /// Weight of the central sigma point
    pub center_weight: f64,
    /// Tie-break order between streams
    pub priority: StreamPriority,
    /// Anchor for the first dt (s)
    pub run_start: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            wheelbase: DEFAULT_WHEELBASE,
            process_noise: DEFAULT_PROCESS_NOISE,
            initial_covariance: DEFAULT_INITIAL_COVARIANCE,
            accuracy_divisor: DEFAULT_ACCURACY_DIVISOR,
            center_weight: DEFAULT_CENTER_WEIGHT,
            priority: StreamPriority::default(),
            run_start: 0.0,
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        self.bicycle_model()?;
        self.noise_model()?;
        self.unscented()?;
        self.noise_matrices()?;
        if self.initial_covariance.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(FilterError::invalid(
                "initial_covariance",
                format!("variances must be finite and non-negative, got {:?}", self.initial_covariance),
            ));
        }
        if !self.run_start.is_finite() {
            return Err(FilterError::invalid("run_start", "must be finite"));
        }
        Ok(())
    }

    pub fn bicycle_model(&self) -> Result<BicycleModel, FilterError> {
        BicycleModel::new(self.wheelbase)
    }

    pub fn noise_model(&self) -> Result<NoiseModel, FilterError> {
        NoiseModel::new(self.accuracy_divisor)
    }

    pub fn unscented(&self) -> Result<UnscentedParams, FilterError> {
        UnscentedParams::new(self.center_weight)
    }

    pub fn noise_matrices(&self) -> Result<NoiseMatrices, FilterError> {
        NoiseMatrices::from_process_diagonal(&self.process_noise)
    }

    /// Initial estimate at a fix's position with zero heading
    pub fn initial_estimate(&self, fix: &PositionFix) -> Result<StateEstimate, FilterError> {
        StateEstimate::from_position(fix.x, fix.y, &self.initial_covariance)
    }
}
