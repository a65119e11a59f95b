// Position measurement model: the fix observes x and y, never heading

use nalgebra::DVector;

use crate::kalman::{X, Y};

/// Dimension of a position measurement
pub const MEASUREMENT_DIM: usize = 2;

/// Map a state vector into measurement space
pub fn observe_position(state: &DVector<f64>) -> DVector<f64> {
    DVector::from_vec(vec![state[X], state[Y]])
}
