use clap::Parser;

use crate::constants::{
    DEFAULT_ACCURACY_DIVISOR, DEFAULT_CENTER_WEIGHT, DEFAULT_INITIAL_COVARIANCE,
    DEFAULT_PROCESS_NOISE, DEFAULT_WHEELBASE,
};
use crate::error::FilterError;
use crate::kalman::STATE_DIM;
use crate::params::{FilterParams, StreamPriority};
use crate::simulate::DriveScenario;

/// Pose fusion configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Vehicle wheelbase in metres.
    #[arg(long, default_value_t = DEFAULT_WHEELBASE)]
    pub wheelbase: f64,

    /// Process noise diagonal as x,y,heading variances.
    #[arg(long, value_delimiter = ',', value_name = "QX,QY,QH", default_values_t = DEFAULT_PROCESS_NOISE.to_vec())]
    pub process_noise: Vec<f64>,

    /// Initial covariance diagonal as x,y,heading variances.
    #[arg(long, value_delimiter = ',', value_name = "PX,PY,PH", default_values_t = DEFAULT_INITIAL_COVARIANCE.to_vec())]
    pub initial_covariance: Vec<f64>,

    /// Divisor turning reported fix accuracy into one standard deviation.
    #[arg(long, default_value_t = DEFAULT_ACCURACY_DIVISOR)]
    pub accuracy_divisor: f64,

    /// Weight of the central sigma point, in [0, 1).
    #[arg(long, default_value_t = DEFAULT_CENTER_WEIGHT)]
    pub center_weight: f64,

    /// Stream order for records sharing a timestamp.
    #[arg(long, value_name = "A,B,C", default_value = "position,speed,steering")]
    pub priority: StreamPriority,

    /// Timestamp the first dt is measured from.
    #[arg(long, default_value_t = 0.0)]
    pub run_start: f64,

    /// Length of the simulated drive in seconds.
    #[arg(long, default_value_t = 60.0)]
    pub duration: f64,

    /// Commanded speed in m/s.
    #[arg(long, default_value_t = 5.0)]
    pub speed: f64,

    /// Steering amplitude in degrees.
    #[arg(long, default_value_t = 5.0)]
    pub steering_amplitude: f64,

    /// Steering period in seconds, 0 for constant steering.
    #[arg(long, default_value_t = 20.0)]
    pub steering_period: f64,

    /// Position fix rate in Hz.
    #[arg(long, default_value_t = 1.0)]
    pub fix_rate: f64,

    /// Speed sample rate in Hz.
    #[arg(long, default_value_t = 10.0)]
    pub speed_rate: f64,

    /// Steering sample rate in Hz.
    #[arg(long, default_value_t = 10.0)]
    pub steering_rate: f64,

    /// Accuracy reported with every fix, in millimetres.
    #[arg(long, default_value_t = 200.0)]
    pub fix_accuracy: f64,

    /// Speed noise standard deviation in m/s.
    #[arg(long, default_value_t = 0.05)]
    pub speed_noise: f64,

    /// Steering noise standard deviation in degrees.
    #[arg(long, default_value_t = 0.2)]
    pub steering_noise: f64,

    /// Emit exact records without measurement noise.
    #[arg(long, default_value_t = false)]
    pub no_noise: bool,

    /// Seed for the measurement noise generator.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write results in CSV format: PREFIX-filter.csv and PREFIX-covar.csv.
    #[arg(long, value_name = "PREFIX")]
    pub write_csv: Vec<String>,

    /// Write the trajectory as a JSON array to a file.
    #[arg(long, value_name = "FILE")]
    pub write_json: Vec<String>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Build and validate the filter parameters
    pub fn filter_params(&self) -> Result<FilterParams, FilterError> {
        let params = FilterParams {
            wheelbase: self.wheelbase,
            process_noise: diagonal("process_noise", &self.process_noise)?,
            initial_covariance: diagonal("initial_covariance", &self.initial_covariance)?,
            accuracy_divisor: self.accuracy_divisor,
            center_weight: self.center_weight,
            priority: self.priority,
            run_start: self.run_start,
        };
        params.validate()?;
        Ok(params)
    }

    /// The simulated drive shares the filter's wheelbase and accuracy divisor
    pub fn scenario(&self) -> DriveScenario {
        DriveScenario {
            duration: self.duration,
            speed: self.speed,
            steering_amplitude: self.steering_amplitude,
            steering_period: self.steering_period,
            wheelbase: self.wheelbase,
            fix_rate: self.fix_rate,
            speed_rate: self.speed_rate,
            steering_rate: self.steering_rate,
            fix_accuracy: self.fix_accuracy,
            accuracy_divisor: self.accuracy_divisor,
            speed_noise: self.speed_noise,
            steering_noise: self.steering_noise,
            noisy: !self.no_noise,
            seed: self.seed,
        }
    }
}

fn diagonal(name: &'static str, values: &[f64]) -> Result<[f64; STATE_DIM], FilterError> {
    values.try_into().map_err(|_| {
        FilterError::invalid(name, format!("expected {} values, got {}", STATE_DIM, values.len()))
    })
}
