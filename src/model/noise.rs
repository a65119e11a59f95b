// Noise covariances for the filter
//
// Q is fixed for the run; R is rebuilt from every position fix's reported
// accuracy, assuming independent axes.

use nalgebra::{DMatrix, DVector};

use crate::constants::MM_TO_M;
use crate::error::FilterError;
use crate::kalman::check_covariance;
use crate::model::measurement::MEASUREMENT_DIM;

/// Accuracy-to-covariance mapping for position fixes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    /// sigma = accuracy / divisor
    pub accuracy_divisor: f64,
}

impl NoiseModel {
    pub fn new(accuracy_divisor: f64) -> Result<Self, FilterError> {
        if !(accuracy_divisor.is_finite() && accuracy_divisor > 0.0) {
            return Err(FilterError::invalid(
                "accuracy_divisor",
                format!("must be positive, got {}", accuracy_divisor),
            ));
        }
        Ok(Self { accuracy_divisor })
    }

    /// Standard deviation (m) for a reported accuracy in millimetres
    pub fn sigma(&self, accuracy_mm: f64) -> f64 {
        accuracy_mm * MM_TO_M / self.accuracy_divisor
    }

    /// 2x2 diagonal measurement covariance
    pub fn measurement_covariance(&self, accuracy_mm: f64) -> DMatrix<f64> {
        let variance = self.sigma(accuracy_mm).powi(2);
        DMatrix::from_diagonal_element(MEASUREMENT_DIM, MEASUREMENT_DIM, variance)
    }

    /// Reported accuracy (mm) that yields the given standard deviation (m)
    pub fn accuracy_for_sigma(&self, sigma: f64) -> f64 {
        sigma * self.accuracy_divisor / MM_TO_M
    }
}

/// Process and measurement noise held by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseMatrices {
    /// Q, fixed for the run
    pub process: DMatrix<f64>,
    /// R, replaced on each position fix
    pub measurement: DMatrix<f64>,
}

impl NoiseMatrices {
    pub fn from_process_diagonal(diagonal: &[f64]) -> Result<Self, FilterError> {
        let process = DMatrix::from_diagonal(&DVector::from_row_slice(diagonal));
        check_covariance(&process)?;
        Ok(Self {
            process,
            measurement: DMatrix::zeros(MEASUREMENT_DIM, MEASUREMENT_DIM),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_covariance() {
        let model = NoiseModel::new(2.0).unwrap();
        // 200 mm -> 0.2 m -> sigma 0.1 m
        let r = model.measurement_covariance(200.0);
        assert_eq!(r.nrows(), 2);
        assert!((r[(0, 0)] - 0.01).abs() < 1e-15);
        assert!((r[(1, 1)] - 0.01).abs() < 1e-15);
        assert_eq!(r[(0, 1)], 0.0);
        assert_eq!(r[(1, 0)], 0.0);
    }

    #[test]
    fn test_accuracy_for_sigma_inverts() {
        let model = NoiseModel::new(3.0).unwrap();
        let acc = model.accuracy_for_sigma(0.1);
        assert!((model.sigma(acc) - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_process_noise_rejects_negative() {
        assert!(NoiseMatrices::from_process_diagonal(&[1e-4, -1e-4, 1e-6]).is_err());
        let noise = NoiseMatrices::from_process_diagonal(&[1e-4, 1e-4, 1e-6]).unwrap();
        assert_eq!(noise.process[(2, 2)], 1e-6);
    }

    #[test]
    fn test_invalid_divisor() {
        assert!(NoiseModel::new(0.0).is_err());
        assert!(NoiseModel::new(f64::NAN).is_err());
    }
}
