use thiserror::Error;

/// Hard failures of the recommendation pipeline. Anything that can be
/// degraded (solver trouble, unusable covariance) is handled internally
/// and surfaces as warnings instead.
#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient universe: need at least {required} investable names, got {available}")]
    InsufficientUniverse { required: usize, available: usize },

    #[error("Missing user profile: no investor profile is on file for this account")]
    MissingUserProfile,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PortfolioError {
    fn from(e: serde_json::Error) -> Self {
        PortfolioError::Serialization(e.to_string())
    }
}

/// Internal solver diagnosis. Callers of the engine never see this type;
/// it decides which branch of [`SolveOutcome`](crate::engine::SolveOutcome)
/// the dispatcher returns.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("infeasible: {reason}")]
    Infeasible { reason: String },

    #[error("numerical failure: {reason}")]
    Numerical { reason: String },
}

impl SolverError {
    /// Status fragment recorded in the audit trail, e.g. `INFEASIBLE`.
    pub fn status_tag(&self) -> &'static str {
        match self {
            SolverError::Infeasible { .. } => "INFEASIBLE",
            SolverError::Numerical { .. } => "NUMERICAL_ERROR",
        }
    }
}
