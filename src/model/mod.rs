// Vehicle, measurement and noise models consumed by the UKF core

pub mod bicycle;
pub mod measurement;
pub mod noise;

pub use bicycle::{BicycleModel, ControlInput};
pub use measurement::{observe_position, MEASUREMENT_DIM};
pub use noise::{NoiseMatrices, NoiseModel};
