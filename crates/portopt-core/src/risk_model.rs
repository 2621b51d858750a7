use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Volatility assumed for names the risk service has no estimate for.
pub const DEFAULT_VOLATILITY: Decimal = dec!(0.25);

/// Floor applied to diagonal variances before taking square roots.
const VARIANCE_FLOOR: Decimal = dec!(0.00000001);

/// Minimum diagonal load added during PSD repair.
const MIN_DIAGONAL_LOAD: Decimal = dec!(0.000001);

/// Trace multiplier for the PSD repair load.
const TRACE_LOAD_FACTOR: Decimal = dec!(0.00000001);

/// Risk model aligned positionally with the universe ordering.
///
/// A full factor covariance is used when the risk service supplies one;
/// otherwise per-name volatilities are squared into a diagonal model.
/// Matrices of the wrong shape degrade to the diagonal form rather than
/// failing the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskModel {
    Covariance { matrix: Vec<Vec<Decimal>> },
    Diagonal { variances: Vec<Decimal> },
}

impl RiskModel {
    /// Builds the model for a universe of `volatilities.len()` names.
    ///
    /// The covariance, when present and well-shaped, gets a small diagonal
    /// load (`max(1e-6, 1e-8 * trace)`) so near-singular estimates stay
    /// positive definite. Returns the model plus any degradation warnings.
    pub fn build(
        covariance: Option<Vec<Vec<Decimal>>>,
        volatilities: &[Decimal],
    ) -> (Self, Vec<String>) {
        let n = volatilities.len();
        let mut warnings = Vec::new();

        if let Some(matrix) = covariance {
            if matrix.is_empty() {
                // Absent estimate, not a degenerate one.
                return (Self::from_volatilities(volatilities), warnings);
            }
            match validate_shape(&matrix, n) {
                Ok(()) => {
                    let mut matrix = matrix;
                    let load = psd_repair(&mut matrix);
                    debug!(%load, n, "applied diagonal load to covariance");
                    return (RiskModel::Covariance { matrix }, warnings);
                }
                Err(reason) => {
                    warn!(%reason, "covariance matrix unusable, degrading to diagonal risk model");
                    warnings.push(format!(
                        "Covariance matrix unusable ({reason}); degraded to diagonal risk model"
                    ));
                }
            }
        }

        (Self::from_volatilities(volatilities), warnings)
    }

    /// Diagonal model from per-name volatilities.
    pub fn from_volatilities(volatilities: &[Decimal]) -> Self {
        RiskModel::Diagonal {
            variances: volatilities.iter().map(|v| *v * *v).collect(),
        }
    }

    /// Number of names the model covers.
    pub fn len(&self) -> usize {
        match self {
            RiskModel::Covariance { matrix } => matrix.len(),
            RiskModel::Diagonal { variances } => variances.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Portfolio variance wᵀΣw.
    pub fn portfolio_variance(&self, weights: &[Decimal]) -> Decimal {
        match self {
            RiskModel::Covariance { matrix } => {
                let sigma_w = mat_vec_multiply(matrix, weights);
                vec_dot(weights, &sigma_w)
            }
            RiskModel::Diagonal { variances } => weights
                .iter()
                .zip(variances.iter())
                .map(|(w, v)| *w * *w * *v)
                .sum(),
        }
    }

    /// Gradient of the variance term, 2Σw.
    pub fn variance_gradient(&self, weights: &[Decimal]) -> Vec<Decimal> {
        let two = dec!(2);
        match self {
            RiskModel::Covariance { matrix } => mat_vec_multiply(matrix, weights)
                .into_iter()
                .map(|g| two * g)
                .collect(),
            RiskModel::Diagonal { variances } => weights
                .iter()
                .zip(variances.iter())
                .map(|(w, v)| two * *w * *v)
                .collect(),
        }
    }

    /// Diagonal element Σᵢᵢ.
    pub fn diagonal(&self, idx: usize) -> Decimal {
        match self {
            RiskModel::Covariance { matrix } => matrix[idx][idx],
            RiskModel::Diagonal { variances } => variances[idx],
        }
    }

    /// Standalone risk of one name, sqrt(max(1e-8, Σᵢᵢ)).
    pub fn per_name_risk(&self, idx: usize) -> Decimal {
        sqrt_decimal(self.diagonal(idx).max(VARIANCE_FLOOR))
    }
}

fn validate_shape(matrix: &[Vec<Decimal>], expected: usize) -> Result<(), String> {
    if matrix.len() != expected {
        return Err(format!(
            "expected {expected}x{expected}, got {} rows",
            matrix.len()
        ));
    }
    for (i, row) in matrix.iter().enumerate() {
        if row.len() != expected {
            return Err(format!(
                "expected {expected}x{expected}, row {i} has {} columns",
                row.len()
            ));
        }
    }
    Ok(())
}

/// Diagonal load keeping near-singular estimates positive definite.
/// Returns the load applied.
fn psd_repair(matrix: &mut [Vec<Decimal>]) -> Decimal {
    let trace: Decimal = (0..matrix.len()).map(|i| matrix[i][i]).sum();
    let eps = (TRACE_LOAD_FACTOR * trace).max(MIN_DIAGONAL_LOAD);
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] += eps;
    }
    eps
}

/// Matrix-vector multiplication.
fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Dot product.
fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}
