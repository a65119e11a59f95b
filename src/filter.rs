// Pose filter: the UKF core bound to the bicycle and position models

use nalgebra::{DMatrix, DVector};

use crate::error::FilterError;
use crate::kalman::{self, StateEstimate, UnscentedParams};
use crate::model::{observe_position, BicycleModel, ControlInput};
use crate::params::FilterParams;
use crate::sensors::PositionFix;

/// Predictor and corrector for the [x, y, heading] pose.
///
/// Holds only fixed model parameters; estimates and noise matrices are
/// passed in and new estimates returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFilter {
    pub model: BicycleModel,
    pub unscented: UnscentedParams,
}

impl PoseFilter {
    pub fn new(model: BicycleModel, unscented: UnscentedParams) -> Self {
        Self { model, unscented }
    }

    pub fn from_params(params: &FilterParams) -> Result<Self, FilterError> {
        Ok(Self::new(params.bicycle_model()?, params.unscented()?))
    }

    /// Time update over `dt` seconds with the stored control input
    pub fn predict(
        &self,
        estimate: &StateEstimate,
        process_noise: &DMatrix<f64>,
        control: ControlInput,
        dt: f64,
    ) -> Result<StateEstimate, FilterError> {
        let model = self.model;
        kalman::predict(
            estimate,
            |state: &DVector<f64>| model.integrate(state, control, dt),
            process_noise,
            &self.unscented,
        )
    }

    /// Measurement update with an observed (x, y) position
    pub fn correct(
        &self,
        predicted: &StateEstimate,
        position: &DVector<f64>,
        measurement_noise: &DMatrix<f64>,
    ) -> Result<StateEstimate, FilterError> {
        kalman::correct(
            predicted,
            observe_position,
            position,
            measurement_noise,
            &self.unscented,
        )
    }

    /// Measurement update from a position fix
    pub fn correct_fix(
        &self,
        predicted: &StateEstimate,
        fix: &PositionFix,
        measurement_noise: &DMatrix<f64>,
    ) -> Result<StateEstimate, FilterError> {
        let position = DVector::from_vec(vec![fix.x, fix.y]);
        self.correct(predicted, &position, measurement_noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::check_covariance;

    fn filter() -> PoseFilter {
        PoseFilter::new(BicycleModel::new(1.0).unwrap(), UnscentedParams::default())
    }

    fn estimate() -> StateEstimate {
        StateEstimate::new(
            DVector::from_vec(vec![2.0, 3.0, 0.4]),
            DMatrix::from_row_slice(3, 3, &[
                0.5, 0.1, 0.02,
                0.1, 0.4, -0.01,
                0.02, -0.01, 0.05,
            ]),
        )
        .unwrap()
    }

    fn q() -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_vec(vec![1e-4, 1e-4, 1e-6]))
    }

    fn assert_valid(est: &StateEstimate) {
        check_covariance(&est.covariance).unwrap();
        let cov = &est.covariance;
        assert!((cov - cov.transpose()).amax() < 1e-12);
        assert!(cov.symmetric_eigenvalues().min() >= -1e-12);
    }

    #[test]
    fn test_predict_zero_dt_adds_process_noise() {
        let est = estimate();
        let pred = filter()
            .predict(&est, &q(), ControlInput::new(5.0, 0.3), 0.0)
            .unwrap();

        for i in 0..3 {
            assert!((pred.mean[i] - est.mean[i]).abs() < 1e-12);
        }
        let expected = &est.covariance + q();
        assert!((&pred.covariance - expected).amax() < 1e-12);
    }

    #[test]
    fn test_predict_moves_along_heading() {
        let est = StateEstimate::new(
            DVector::from_vec(vec![0.0, 0.0, 0.0]),
            DMatrix::from_diagonal(&DVector::from_vec(vec![0.01, 0.01, 1e-8])),
        )
        .unwrap();
        let pred = filter()
            .predict(&est, &q(), ControlInput::new(2.0, 0.0), 0.5)
            .unwrap();

        assert!((pred.x() - 1.0).abs() < 1e-6);
        assert!(pred.y().abs() < 1e-9);
        assert!(pred.heading().abs() < 1e-12);
        // Uncertainty grows by at least Q
        assert!(pred.covariance[(0, 0)] >= 0.01 + 1e-4 - 1e-12);
    }

    #[test]
    fn test_covariance_valid_after_each_step() {
        let f = filter();
        let r = DMatrix::from_diagonal_element(2, 2, 0.04);
        let mut est = estimate();
        for k in 0..20 {
            let control = ControlInput::new(1.5, 0.2 * ((k as f64) * 0.3).sin());
            est = f.predict(&est, &q(), control, 0.1).unwrap();
            assert_valid(&est);
            let z = DVector::from_vec(vec![est.x() + 0.05, est.y() - 0.05]);
            est = f.correct(&est, &z, &r).unwrap();
            assert_valid(&est);
        }
    }

    #[test]
    fn test_correct_pulls_toward_fix() {
        let est = estimate();
        let fix = PositionFix { timestamp: 0.0, x: 3.0, y: 3.0, accuracy: 100.0 };
        let r = DMatrix::from_diagonal_element(2, 2, 0.01);
        let filt = filter().correct_fix(&est, &fix, &r).unwrap();

        assert!(filt.x() > 2.9 && filt.x() < 3.0);
        assert!(filt.covariance[(0, 0)] < est.covariance[(0, 0)]);
        assert!(filt.covariance[(1, 1)] < est.covariance[(1, 1)]);
    }
}
