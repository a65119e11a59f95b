// Unscented Kalman Filter core functions
//
// Sigma-point generation, the unscented transform and the additive-noise
// predict/correct steps. All functions are pure: they take an estimate and
// return a new one.

use nalgebra as na;
use na::{DMatrix, DVector};

use super::state::{check_covariance, StateEstimate, COVARIANCE_FLOOR, PSD_TOLERANCE};
use crate::constants::DEFAULT_CENTER_WEIGHT;
use crate::error::{FilterError, Instability};

/// Innovation allowed along a zero-variance measurement direction,
/// relative to the measurement magnitude
const INNOVATION_TOLERANCE: f64 = 1e-9;

/// Spread parameterization of the sigma points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnscentedParams {
    /// Weight of the central sigma point, in [0, 1)
    pub center_weight: f64,
}

impl Default for UnscentedParams {
    fn default() -> Self {
        Self { center_weight: DEFAULT_CENTER_WEIGHT }
    }
}

impl UnscentedParams {
    pub fn new(center_weight: f64) -> Result<Self, FilterError> {
        let params = Self { center_weight };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if !(0.0..1.0).contains(&self.center_weight) {
            return Err(FilterError::invalid(
                "center_weight",
                format!("must lie in [0, 1), got {}", self.center_weight),
            ));
        }
        Ok(())
    }

    /// Scale factor applied to the square-root columns: sqrt(n / (1 - w0))
    pub fn spread(&self, n_dim: usize) -> f64 {
        (n_dim as f64 / (1.0 - self.center_weight)).sqrt()
    }

    /// Weight of each non-central point
    pub fn outer_weight(&self, n_dim: usize) -> f64 {
        (1.0 - self.center_weight) / (2 * n_dim) as f64
    }
}

/// Sigma points (2n+1) and their weights, which sum to one.
///
/// The same weights serve for the mean and the covariance.
#[derive(Debug, Clone)]
pub struct SigmaPointSet {
    pub points: Vec<DVector<f64>>,
    pub weights: Vec<f64>,
}

impl SigmaPointSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Dimension of each point
    pub fn dim(&self) -> usize {
        self.points.first().map_or(0, |p| p.len())
    }

    /// Push every point through `f`, keeping the weights
    pub fn map<F>(&self, f: F) -> SigmaPointSet
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        SigmaPointSet {
            points: self.points.iter().map(f).collect(),
            weights: self.weights.clone(),
        }
    }

    pub fn weighted_mean(&self) -> DVector<f64> {
        self.points
            .iter()
            .zip(&self.weights)
            .fold(DVector::zeros(self.dim()), |acc, (point, w)| acc + point * *w)
    }

    /// Weighted sum of outer products of deviations from `mean`
    pub fn weighted_covariance(&self, mean: &DVector<f64>) -> DMatrix<f64> {
        self.cross_covariance(mean, self, mean)
    }

    /// Weighted sum of (self_i - mean) (other_i - other_mean)^T
    pub fn cross_covariance(
        &self,
        mean: &DVector<f64>,
        other: &SigmaPointSet,
        other_mean: &DVector<f64>,
    ) -> DMatrix<f64> {
        self.points
            .iter()
            .zip(&other.points)
            .zip(&self.weights)
            .fold(
                DMatrix::zeros(self.dim(), other.dim()),
                |acc, ((a, b), w)| {
                    let da = a - mean;
                    let db = b - other_mean;
                    acc + (da * db.transpose()) * *w
                },
            )
    }
}

/// Matrix square root A with A * A^T = cov.
///
/// Cholesky when the covariance is positive definite; for a semidefinite
/// (singular) covariance, V * sqrt(D) from the symmetric eigendecomposition.
pub fn matrix_square_root(covariance: &DMatrix<f64>) -> Result<DMatrix<f64>, FilterError> {
    check_covariance(covariance)?;

    if let Some(chol) = covariance.clone().cholesky() {
        return Ok(chol.l());
    }

    // Eigenvalues below zero are within tolerance here (checked above)
    let eigen = covariance.clone().symmetric_eigen();
    let roots = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    Ok(&eigen.eigenvectors * DMatrix::from_diagonal(&roots))
}

/// Calculate sigma points from an estimate
///
/// Point 0 is the mean, points 1..n are mean + spread * col_j(A),
/// points n+1..2n are mean - spread * col_j(A).
pub fn sigma_points(estimate: &StateEstimate, params: &UnscentedParams) -> Result<SigmaPointSet, FilterError> {
    let n_dim = estimate.mean.len();
    let mu = &estimate.mean;
    let root = matrix_square_root(&estimate.covariance)?;
    let scale = params.spread(n_dim);

    let mut points = Vec::with_capacity(2 * n_dim + 1);
    points.push(mu.clone());
    for i in 0..n_dim {
        points.push(mu + root.column(i) * scale);
    }
    for i in 0..n_dim {
        points.push(mu - root.column(i) * scale);
    }

    let mut weights = vec![params.outer_weight(n_dim); 2 * n_dim + 1];
    weights[0] = params.center_weight;

    Ok(SigmaPointSet { points, weights })
}

/// Mean and covariance of a sigma-point set, plus optional additive noise
pub fn points_to_estimate(
    points: &SigmaPointSet,
    noise: Option<&DMatrix<f64>>,
) -> Result<StateEstimate, FilterError> {
    let mean = points.weighted_mean();
    let mut covariance = points.weighted_covariance(&mean);
    if let Some(noise) = noise {
        covariance += noise;
    }
    StateEstimate::new(mean, covariance)
}

/// Time update: propagate the estimate through `transition` and add the
/// process noise once.
pub fn predict<F>(
    estimate: &StateEstimate,
    transition: F,
    process_noise: &DMatrix<f64>,
    params: &UnscentedParams,
) -> Result<StateEstimate, FilterError>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let points = sigma_points(estimate, params)?;
    let propagated = points.map(transition);
    points_to_estimate(&propagated, Some(process_noise))
}

/// Measurement update with an additive-noise observation model
pub fn correct<H>(
    predicted: &StateEstimate,
    observation: H,
    measurement: &DVector<f64>,
    measurement_noise: &DMatrix<f64>,
    params: &UnscentedParams,
) -> Result<StateEstimate, FilterError>
where
    H: Fn(&DVector<f64>) -> DVector<f64>,
{
    if measurement.iter().any(|v| !v.is_finite()) {
        let offending = DMatrix::from_column_slice(measurement.len(), 1, measurement.as_slice());
        return Err(FilterError::instability(Instability::NonFinite, &offending));
    }

    let points = sigma_points(predicted, params)?;
    let observed = points.map(observation);

    let obs_mean = observed.weighted_mean();
    let innovation_cov = observed.weighted_covariance(&obs_mean) + measurement_noise;
    let cross_cov = points.cross_covariance(&predicted.mean, &observed, &obs_mean);

    if innovation_cov.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::instability(Instability::NonFinite, &innovation_cov));
    }

    let innovation = measurement - &obs_mean;
    let gain = kalman_gain(&cross_cov, &innovation_cov, &innovation, measurement)?;
    let mean = &predicted.mean + &gain * innovation;
    let covariance = &predicted.covariance - &gain * &innovation_cov * gain.transpose();

    StateEstimate::new(mean, covariance)
}

/// Kalman gain K = Cxz * S^-1.
///
/// A positive definite S is inverted through its Cholesky factor. Directions
/// of S with variance at the numerical floor carry no information and get
/// zero gain, as long as the innovation along them is negligible; a
/// measurement that contradicts a zero-variance prediction is a singular
/// innovation.
fn kalman_gain(
    cross_cov: &DMatrix<f64>,
    innovation_cov: &DMatrix<f64>,
    innovation: &DVector<f64>,
    measurement: &DVector<f64>,
) -> Result<DMatrix<f64>, FilterError> {
    let eigen = innovation_cov.clone().symmetric_eigen();
    let min_eigenvalue = eigen.eigenvalues.min();
    let cutoff = PSD_TOLERANCE * eigen.eigenvalues.amax() + COVARIANCE_FLOOR;

    if min_eigenvalue > cutoff {
        let chol = innovation_cov
            .clone()
            .cholesky()
            .ok_or_else(|| FilterError::instability(Instability::SingularInnovation, innovation_cov))?;
        // (S^-1 * Cxz^T)^T since S is symmetric
        return Ok(chol.solve(&cross_cov.transpose()).transpose());
    }
    if min_eigenvalue < -cutoff {
        return Err(FilterError::instability(
            Instability::NotPositiveSemidefinite { min_eigenvalue },
            innovation_cov,
        ));
    }

    let tolerance = INNOVATION_TOLERANCE * measurement.amax().max(1.0);
    let dim = innovation_cov.nrows();
    let mut inverse = DMatrix::zeros(dim, dim);
    for (i, &lambda) in eigen.eigenvalues.iter().enumerate() {
        let direction = eigen.eigenvectors.column(i);
        if lambda > cutoff {
            inverse += (direction * direction.transpose()) / lambda;
        } else if direction.dot(innovation).abs() > tolerance {
            return Err(FilterError::instability(Instability::SingularInnovation, innovation_cov));
        }
    }
    Ok(cross_cov * inverse)
}
