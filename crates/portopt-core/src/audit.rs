//! Deterministic input hashing for idempotency short-circuits and
//! reproducibility records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::constraints::OptimizationConstraints;
use crate::types::PortfolioWeights;

/// SHA-256 over the canonical JSON rendering of `data`.
/// serde_json orders object keys lexicographically, so structurally equal
/// inputs always produce the same digest regardless of construction order.
pub fn canonical_sha256<T: Serialize>(data: &T) -> String {
    let canonical = serde_json::to_value(data).unwrap_or_default().to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Idempotency key for a recommendation request. Two requests hash equal
/// when they name the same account, model/feature-view versions, requested
/// universe (order-insensitive), as-of date and constraints.
pub fn request_key(
    account_id: i64,
    model_version: &str,
    feature_view_version: &str,
    universe: Option<&[String]>,
    as_of: Option<NaiveDate>,
    constraints: &OptimizationConstraints,
) -> String {
    let mut requested: Vec<String> = universe.map(|u| u.to_vec()).unwrap_or_default();
    requested.sort();
    canonical_sha256(&json!({
        "u": account_id,
        "model": model_version,
        "fv": feature_view_version,
        "universe": requested,
        "as_of": as_of.map(|d| d.to_string()).unwrap_or_default(),
        "constraints": constraints,
    }))
}

/// Hash of the optimizer's effective inputs: resolved symbols, aligned
/// expected returns, covariance digest and constraints. Bit-identical
/// inputs yield bit-identical hashes.
pub fn inputs_hash(
    symbols: &[String],
    expected_returns: &[Decimal],
    covariance: Option<&Vec<Vec<Decimal>>>,
    constraints: &OptimizationConstraints,
) -> String {
    let cov_hash = covariance.map(canonical_sha256);
    canonical_sha256(&json!({
        "symbols": symbols,
        "mu": expected_returns,
        "cov_hash": cov_hash,
        "constraints": constraints,
    }))
}

/// Count of previous positions above the reporting threshold.
pub fn nonzero_positions(weights: &PortfolioWeights) -> usize {
    weights.values().filter(|v| **v > dec!(0.000001)).count()
}

/// Reproducibility record attached to every generated recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub idempotency_key: String,
    pub as_of: NaiveDate,
    pub model_version: String,
    pub feature_view_version: String,
    pub universe_count: usize,
    pub inputs_hash: String,
    pub prev_weights_nonzero: usize,
    pub optimizer_status: String,
    pub transaction_cost_estimate: Decimal,
    /// Wall-clock creation time; deliberately excluded from both hashes.
    pub created_at: DateTime<Utc>,
}
