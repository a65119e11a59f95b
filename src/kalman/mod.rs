// Kalman filter module
// Unscented Kalman filter core over an explicit state estimate

pub mod unscented;
pub mod state;

pub use unscented::{
    correct, matrix_square_root, points_to_estimate, predict, sigma_points, SigmaPointSet,
    UnscentedParams,
};
pub use state::{check_covariance, StateEstimate, HEADING, STATE_DIM, X, Y};
