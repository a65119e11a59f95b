// Filter state estimate: mean and covariance of the vehicle pose
//
// Every estimate handed out by the filter has passed `check_covariance`,
// so downstream code can rely on a finite, symmetric, PSD covariance.

use nalgebra as na;
use na::{DMatrix, DVector};

use crate::error::{FilterError, Instability};

/// Dimension of the pose state: [x, y, heading]
pub const STATE_DIM: usize = 3;

pub const X: usize = 0;
pub const Y: usize = 1;
pub const HEADING: usize = 2;

/// Relative tolerance for covariance symmetry
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Relative tolerance for negative eigenvalues
pub(crate) const PSD_TOLERANCE: f64 = 1e-9;

/// Absolute floor under the relative tolerances (m^2, rad^2).
///
/// Variances below this are rounding noise, e.g. after an exact
/// position observation.
pub(crate) const COVARIANCE_FLOOR: f64 = 1e-14;

/// Mean and covariance of a multivariate normal over the state space
#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimate {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl StateEstimate {
    /// Build an estimate, rejecting a covariance that is not a valid one.
    ///
    /// Small asymmetry within tolerance is removed by averaging with the
    /// transpose.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self, FilterError> {
        let n = mean.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(FilterError::invalid(
                "covariance",
                format!(
                    "expected {}x{} matrix, got {}x{}",
                    n,
                    n,
                    covariance.nrows(),
                    covariance.ncols()
                ),
            ));
        }
        if mean.iter().any(|v| !v.is_finite()) {
            let offending = DMatrix::from_column_slice(n, 1, mean.as_slice());
            return Err(FilterError::instability(Instability::NonFinite, &offending));
        }
        check_covariance(&covariance)?;

        let covariance = (&covariance + covariance.transpose()) * 0.5;
        Ok(Self { mean, covariance })
    }

    /// Initial pose from a position fix, with zero heading
    pub fn from_position(x: f64, y: f64, covariance_diagonal: &[f64; STATE_DIM]) -> Result<Self, FilterError> {
        Self::new(
            DVector::from_vec(vec![x, y, 0.0]),
            DMatrix::from_diagonal(&DVector::from_row_slice(covariance_diagonal)),
        )
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn x(&self) -> f64 {
        self.mean[X]
    }

    pub fn y(&self) -> f64 {
        self.mean[Y]
    }

    /// Heading in radians, unwrapped
    pub fn heading(&self) -> f64 {
        self.mean[HEADING]
    }

    /// Heading in degrees, wrapped to [0, 360)
    pub fn heading_degrees(&self) -> f64 {
        self.heading().to_degrees().rem_euclid(360.0)
    }

    /// Position error in meters (sqrt of trace of position covariance)
    pub fn position_error(&self) -> f64 {
        let pe = self.covariance[(X, X)] + self.covariance[(Y, Y)];
        pe.max(0.0).sqrt()
    }

    pub fn trace(&self) -> f64 {
        self.covariance.trace()
    }
}

/// Check that a covariance is finite, symmetric and positive semidefinite.
///
/// Returns the offending matrix inside the error; nothing is clamped.
pub fn check_covariance(covariance: &DMatrix<f64>) -> Result<(), FilterError> {
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::instability(Instability::NonFinite, covariance));
    }

    let max_deviation = (covariance - covariance.transpose()).amax();
    if max_deviation > SYMMETRY_TOLERANCE * covariance.amax() + COVARIANCE_FLOOR {
        return Err(FilterError::instability(
            Instability::Asymmetric { max_deviation },
            covariance,
        ));
    }

    let symmetric = (covariance + covariance.transpose()) * 0.5;
    let eigenvalues = symmetric.symmetric_eigenvalues();
    let min_eigenvalue = eigenvalues.min();
    if min_eigenvalue < -(PSD_TOLERANCE * eigenvalues.amax() + COVARIANCE_FLOOR) {
        return Err(FilterError::instability(
            Instability::NotPositiveSemidefinite { min_eigenvalue },
            covariance,
        ));
    }

    Ok(())
}
