// Simulated drive: ground-truth bicycle path and the sensor streams it produces

use std::f64::consts::TAU;

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::constants::{DEFAULT_ACCURACY_DIVISOR, DEFAULT_WHEELBASE, SIMULATION_STEP};
use crate::error::FilterError;
use crate::kalman::{STATE_DIM, X, Y};
use crate::model::{BicycleModel, ControlInput, NoiseModel};
use crate::sensors::{PositionFix, SpeedSample, SteeringSample, StreamKind};

/// Commanded drive and sensor rates
#[derive(Debug, Clone, PartialEq)]
pub struct DriveScenario {
    /// Length of the drive (s)
    pub duration: f64,
    /// Commanded speed (m/s)
    pub speed: f64,
    /// Steering amplitude (degrees)
    pub steering_amplitude: f64,
    /// Period of the sinusoidal steering command (s); 0 holds the amplitude
    pub steering_period: f64,
    pub wheelbase: f64,
    /// Sample rates (Hz)
    pub fix_rate: f64,
    pub speed_rate: f64,
    pub steering_rate: f64,
    /// Accuracy reported with every fix (mm)
    pub fix_accuracy: f64,
    pub accuracy_divisor: f64,
    /// Noise on speed samples (m/s, one sigma)
    pub speed_noise: f64,
    /// Noise on steering samples (degrees, one sigma)
    pub steering_noise: f64,
    /// Add Gaussian noise to the emitted records
    pub noisy: bool,
    /// Fixed seed for reproducible noise
    pub seed: Option<u64>,
}

impl Default for DriveScenario {
    fn default() -> Self {
        Self {
            duration: 60.0,
            speed: 5.0,
            steering_amplitude: 5.0,
            steering_period: 20.0,
            wheelbase: DEFAULT_WHEELBASE,
            fix_rate: 1.0,
            speed_rate: 10.0,
            steering_rate: 10.0,
            fix_accuracy: 200.0,
            accuracy_divisor: DEFAULT_ACCURACY_DIVISOR,
            speed_noise: 0.05,
            steering_noise: 0.2,
            noisy: true,
            seed: None,
        }
    }
}

/// Ground-truth pose at a fix time
#[derive(Debug, Clone, PartialEq)]
pub struct TruthSample {
    pub timestamp: f64,
    pub state: DVector<f64>,
}

/// Output of a simulated drive
#[derive(Debug, Clone, Default)]
pub struct SimulatedDrive {
    pub positions: Vec<PositionFix>,
    pub speeds: Vec<SpeedSample>,
    pub steering: Vec<SteeringSample>,
    /// True pose at every fix
    pub truth: Vec<TruthSample>,
}

impl DriveScenario {
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.duration.is_finite() && self.duration >= 0.0) {
            return Err(FilterError::invalid("duration", format!("must be finite and non-negative, got {}", self.duration)));
        }
        for (name, rate) in [
            ("fix_rate", self.fix_rate),
            ("speed_rate", self.speed_rate),
            ("steering_rate", self.steering_rate),
        ] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(FilterError::invalid(name, format!("must be positive, got {}", rate)));
            }
        }
        for (name, sigma) in [
            ("fix_accuracy", self.fix_accuracy),
            ("speed_noise", self.speed_noise),
            ("steering_noise", self.steering_noise),
        ] {
            if !(sigma.is_finite() && sigma >= 0.0) {
                return Err(FilterError::invalid(name, format!("must be non-negative, got {}", sigma)));
            }
        }
        if !(self.steering_period.is_finite() && self.steering_period >= 0.0) {
            return Err(FilterError::invalid("steering_period", "must be non-negative"));
        }
        if !(self.speed.is_finite() && self.steering_amplitude.is_finite()) {
            return Err(FilterError::invalid("speed", "commands must be finite"));
        }
        Ok(())
    }

    /// Commanded steering angle at time `t` (degrees)
    pub fn steering_at(&self, t: f64) -> f64 {
        if self.steering_period > 0.0 {
            self.steering_amplitude * (TAU * t / self.steering_period).sin()
        } else {
            self.steering_amplitude
        }
    }

    fn command_at(&self, t: f64) -> ControlInput {
        ControlInput::new(self.speed, self.steering_at(t).to_radians())
    }

    /// Sample times for one stream, starting at zero
    fn sample_times(&self, rate: f64) -> Vec<f64> {
        let count = (self.duration * rate + 1e-9).floor() as usize;
        (0..=count).map(|k| k as f64 / rate).collect()
    }

    /// Drive from the origin heading east and record what the sensors see
    pub fn simulate(&self) -> Result<SimulatedDrive, FilterError> {
        self.validate()?;
        let model = BicycleModel::new(self.wheelbase)?;
        let fix_sigma = NoiseModel::new(self.accuracy_divisor)?.sigma(self.fix_accuracy);

        let mut noise = NoiseSource::new(self.noisy, self.seed);
        let position_noise = noise.normal("fix_accuracy", fix_sigma)?;
        let speed_noise = noise.normal("speed_noise", self.speed_noise)?;
        let steering_noise = noise.normal("steering_noise", self.steering_noise)?;

        let mut events: Vec<(f64, StreamKind)> = Vec::new();
        for (kind, rate) in [
            (StreamKind::Position, self.fix_rate),
            (StreamKind::Speed, self.speed_rate),
            (StreamKind::Steering, self.steering_rate),
        ] {
            events.extend(self.sample_times(rate).into_iter().map(|t| (t, kind)));
        }
        events.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut drive = SimulatedDrive::default();
        let mut state = DVector::zeros(STATE_DIM);
        let mut t = 0.0;

        for (timestamp, kind) in events {
            if timestamp > t {
                let steps = ((timestamp - t) / SIMULATION_STEP).ceil().max(1.0) as usize;
                let h = (timestamp - t) / steps as f64;
                for k in 0..steps {
                    state = model.integrate(&state, self.command_at(t + k as f64 * h), h);
                }
                t = timestamp;
            }

            match kind {
                StreamKind::Position => {
                    drive.positions.push(PositionFix {
                        timestamp,
                        x: state[X] + noise.sample(&position_noise),
                        y: state[Y] + noise.sample(&position_noise),
                        accuracy: self.fix_accuracy,
                    });
                    drive.truth.push(TruthSample { timestamp, state: state.clone() });
                }
                StreamKind::Speed => drive.speeds.push(SpeedSample {
                    timestamp,
                    speed: self.speed + noise.sample(&speed_noise),
                }),
                StreamKind::Steering => drive.steering.push(SteeringSample {
                    timestamp,
                    angle: self.steering_at(timestamp) + noise.sample(&steering_noise),
                }),
            }
        }

        debug!(
            fixes = drive.positions.len(),
            speeds = drive.speeds.len(),
            steering = drive.steering.len(),
            noisy = self.noisy,
            "Simulated drive"
        );
        Ok(drive)
    }
}

/// Optional Gaussian noise; a no-op when disabled
struct NoiseSource {
    rng: Option<StdRng>,
}

impl NoiseSource {
    fn new(enabled: bool, seed: Option<u64>) -> Self {
        let rng = enabled.then(|| match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });
        Self { rng }
    }

    fn normal(&self, name: &'static str, sigma: f64) -> Result<Normal<f64>, FilterError> {
        Normal::new(0.0, sigma).map_err(|e| FilterError::invalid(name, e.to_string()))
    }

    fn sample(&mut self, dist: &Normal<f64>) -> f64 {
        match self.rng.as_mut() {
            Some(rng) => dist.sample(rng),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight() -> DriveScenario {
        DriveScenario {
            duration: 10.0,
            speed: 2.0,
            steering_amplitude: 0.0,
            steering_period: 0.0,
            noisy: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_stream_rates() {
        let drive = straight().simulate().unwrap();
        assert_eq!(drive.positions.len(), 11);
        assert_eq!(drive.speeds.len(), 101);
        assert_eq!(drive.steering.len(), 101);
        assert_eq!(drive.truth.len(), drive.positions.len());
        assert_eq!(drive.positions[3].timestamp, 3.0);
        assert!((drive.speeds[25].timestamp - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_noiseless_straight_drive() {
        let drive = straight().simulate().unwrap();
        for fix in &drive.positions {
            assert!((fix.x - 2.0 * fix.timestamp).abs() < 1e-9);
            assert!(fix.y.abs() < 1e-12);
            assert_eq!(fix.accuracy, 200.0);
        }
        assert!(drive.speeds.iter().all(|s| s.speed == 2.0));
        assert!(drive.steering.iter().all(|s| s.angle == 0.0));
    }

    #[test]
    fn test_sinusoidal_steering() {
        let scenario = DriveScenario { steering_amplitude: 10.0, steering_period: 4.0, ..straight() };
        assert!(scenario.steering_at(0.0).abs() < 1e-12);
        assert!((scenario.steering_at(1.0) - 10.0).abs() < 1e-12);
        assert!((scenario.steering_at(3.0) + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_steering_turns_in_circle() {
        let scenario = DriveScenario {
            steering_amplitude: 20.0,
            wheelbase: 1.0,
            ..straight()
        };
        let drive = scenario.simulate().unwrap();
        let radius = 1.0 / 20.0_f64.to_radians().tan();
        for truth in &drive.truth {
            let dx = truth.state[0];
            let dy = truth.state[1] - radius;
            assert!(((dx * dx + dy * dy).sqrt() - radius).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let scenario = DriveScenario { noisy: true, seed: Some(7), ..straight() };
        let a = scenario.simulate().unwrap();
        let b = scenario.simulate().unwrap();
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.speeds, b.speeds);

        // Noise is applied to the records but not to the truth
        assert!(a.positions.iter().zip(&a.truth).any(|(fix, truth)| fix.x != truth.state[0]));
        assert!((a.truth[10].state[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_scenario() {
        assert!(DriveScenario { fix_rate: 0.0, ..straight() }.simulate().is_err());
        assert!(DriveScenario { duration: -1.0, ..straight() }.simulate().is_err());
        assert!(DriveScenario { speed_noise: -0.1, ..straight() }.simulate().is_err());
        assert!(DriveScenario { wheelbase: 0.0, ..straight() }.simulate().is_err());
    }
}
