// Error taxonomy for the filter core and the fusion scheduler

use nalgebra::DMatrix;
use thiserror::Error;

use crate::kalman::StateEstimate;
use crate::sensors::StreamKind;

/// Cause of a numerical failure inside the UKF core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Instability {
    /// Covariance has an eigenvalue below zero beyond tolerance
    #[error("covariance not positive semidefinite (min eigenvalue {min_eigenvalue:e})")]
    NotPositiveSemidefinite { min_eigenvalue: f64 },
    /// Covariance differs from its transpose beyond tolerance
    #[error("covariance not symmetric (max deviation {max_deviation:e})")]
    Asymmetric { max_deviation: f64 },
    /// Matrix or vector holds NaN or infinity
    #[error("non-finite values in filter state")]
    NonFinite,
    /// Measurement contradicts a zero-variance predicted measurement
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

/// Errors raised by the filter core, the sensor streams and parameter validation
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    /// The offending matrix is kept for diagnosis
    #[error("numerical instability: {kind}")]
    NumericalInstability { kind: Instability, matrix: DMatrix<f64> },

    #[error("malformed {stream} record: {reason}")]
    MalformedRecord { stream: StreamKind, reason: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl FilterError {
    pub fn instability(kind: Instability, matrix: &DMatrix<f64>) -> Self {
        FilterError::NumericalInstability { kind, matrix: matrix.clone() }
    }

    pub fn malformed(stream: StreamKind, reason: impl Into<String>) -> Self {
        FilterError::MalformedRecord { stream, reason: reason.into() }
    }

    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        FilterError::InvalidParameter { name, reason: reason.into() }
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, FilterError::NumericalInstability { .. })
    }
}

/// Diagnostic context captured when the scheduler halts on an error.
///
/// `estimate` is the filter state that was fed into the failing operation;
/// the failing output matrix, if any, travels inside `source`.
#[derive(Debug, Clone, Error)]
#[error("filter faulted at t={timestamp:.6} on {stream} record: {source}")]
pub struct Fault {
    pub timestamp: f64,
    pub stream: StreamKind,
    pub estimate: StateEstimate,
    pub source: FilterError,
}
