// Kinematic bicycle process model
//
// x' = v cos(theta), y' = v sin(theta), theta' = v tan(delta) / L
// integrated with a single classic Runge-Kutta stage of size dt.

use nalgebra::DVector;

use crate::error::FilterError;
use crate::kalman::{HEADING, X, Y};

/// Latest known control inputs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    /// Forward speed (m/s)
    pub speed: f64,
    /// Steering angle (rad)
    pub steering: f64,
}

impl ControlInput {
    pub fn new(speed: f64, steering: f64) -> Self {
        Self { speed, steering }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BicycleModel {
    /// Distance between axles (m)
    pub wheelbase: f64,
}

impl BicycleModel {
    pub fn new(wheelbase: f64) -> Result<Self, FilterError> {
        if !(wheelbase.is_finite() && wheelbase > 0.0) {
            return Err(FilterError::invalid(
                "wheelbase",
                format!("must be positive, got {}", wheelbase),
            ));
        }
        Ok(Self { wheelbase })
    }

    /// Continuous-time state derivative
    pub fn derivative(&self, state: &DVector<f64>, control: ControlInput) -> DVector<f64> {
        let heading = state[HEADING];
        let v = control.speed;

        let mut dx = DVector::zeros(state.len());
        dx[X] = v * heading.cos();
        dx[Y] = v * heading.sin();
        dx[HEADING] = v * control.steering.tan() / self.wheelbase;
        dx
    }

    /// Advance `state` by `dt` seconds with one RK4 step.
    ///
    /// A non-positive dt leaves the state unchanged.
    pub fn integrate(&self, state: &DVector<f64>, control: ControlInput, dt: f64) -> DVector<f64> {
        if dt <= 0.0 {
            return state.clone();
        }

        let k1 = self.derivative(state, control);
        let k2 = self.derivative(&(state + &k1 * (dt / 2.0)), control);
        let k3 = self.derivative(&(state + &k2 * (dt / 2.0)), control);
        let k4 = self.derivative(&(state + &k3 * dt), control);

        state + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn state(x: f64, y: f64, heading: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y, heading])
    }

    #[test]
    fn test_straight_line() {
        let model = BicycleModel::new(1.0).unwrap();
        let next = model.integrate(&state(1.0, 2.0, 0.0), ControlInput::new(3.0, 0.0), 2.0);

        assert!((next[X] - 7.0).abs() < 1e-12);
        assert!((next[Y] - 2.0).abs() < 1e-12);
        assert!(next[HEADING].abs() < 1e-12);
    }

    #[test]
    fn test_heading_north() {
        let model = BicycleModel::new(1.0).unwrap();
        let next = model.integrate(&state(0.0, 0.0, FRAC_PI_2), ControlInput::new(1.0, 0.0), 1.0);

        assert!(next[X].abs() < 1e-12);
        assert!((next[Y] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_or_negative_dt_is_noop() {
        let model = BicycleModel::new(2.0).unwrap();
        let s = state(5.0, -1.0, 0.3);
        let control = ControlInput::new(10.0, 0.2);

        assert_eq!(model.integrate(&s, control, 0.0), s);
        assert_eq!(model.integrate(&s, control, -0.5), s);
    }

    #[test]
    fn test_turn_rate() {
        // Heading rate is constant under constant control, so RK4 is exact
        let model = BicycleModel::new(2.0).unwrap();
        let steering = 0.1f64;
        let next = model.integrate(&state(0.0, 0.0, 0.0), ControlInput::new(4.0, steering), 0.5);

        let expected = 4.0 * steering.tan() / 2.0 * 0.5;
        assert!((next[HEADING] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_circle_accuracy() {
        // Quarter circle of radius L / tan(delta) in small steps
        let wheelbase = 1.0;
        let steering = (1.0f64).atan(); // radius 1 m
        let model = BicycleModel::new(wheelbase).unwrap();
        let control = ControlInput::new(1.0, steering);

        let steps = 100;
        let dt = (PI / 2.0) / steps as f64;
        let mut s = state(0.0, 0.0, 0.0);
        for _ in 0..steps {
            s = model.integrate(&s, control, dt);
        }

        assert!((s[X] - 1.0).abs() < 1e-8);
        assert!((s[Y] - 1.0).abs() < 1e-8);
        assert!((s[HEADING] - FRAC_PI_2).abs() < 1e-10);
    }

    #[test]
    fn test_invalid_wheelbase() {
        assert!(BicycleModel::new(0.0).is_err());
        assert!(BicycleModel::new(-1.0).is_err());
        assert!(BicycleModel::new(f64::INFINITY).is_err());
    }
}
