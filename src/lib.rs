pub mod constants;
pub mod error;
pub mod kalman;
pub mod model;
pub mod sensors;
pub mod params;
pub mod filter;
pub mod trajectory;
pub mod scheduler;
pub mod simulate;
pub mod output;
pub mod config;
