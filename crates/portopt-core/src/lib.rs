pub mod audit;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod providers;
pub mod recommend;
pub mod risk_metrics;
pub mod risk_model;
pub mod tcost;
pub mod types;
pub mod universe;

pub use error::PortfolioError;
pub use types::*;

/// Standard result type for all portfolio operations
pub type PortfolioResult<T> = Result<T, PortfolioError>;
