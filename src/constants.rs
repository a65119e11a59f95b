// Shared constants and default run parameters

use crate::sensors::StreamKind;

/// Default vehicle wheelbase (m)
pub const DEFAULT_WHEELBASE: f64 = 2.5;

/// Default weight of the central sigma point
pub const DEFAULT_CENTER_WEIGHT: f64 = 1.0 / 3.0;

/// Reported accuracy (m) is divided by this to get one standard deviation.
/// Empirical; receivers report roughly a two-sigma radius.
pub const DEFAULT_ACCURACY_DIVISOR: f64 = 2.0;

/// Default process noise diagonal: x (m^2), y (m^2), heading (rad^2)
pub const DEFAULT_PROCESS_NOISE: [f64; 3] = [1e-4, 1e-4, 1e-6];

/// Default initial covariance diagonal: x (m^2), y (m^2), heading (rad^2)
pub const DEFAULT_INITIAL_COVARIANCE: [f64; 3] = [1.0, 1.0, 0.1];

/// Default tie-break order for records sharing a timestamp
pub const DEFAULT_STREAM_PRIORITY: [StreamKind; 3] =
    [StreamKind::Position, StreamKind::Speed, StreamKind::Steering];

/// Millimetres to metres
pub const MM_TO_M: f64 = 1e-3;

/// Largest integration step used when simulating ground truth (s)
pub const SIMULATION_STEP: f64 = 0.01;
