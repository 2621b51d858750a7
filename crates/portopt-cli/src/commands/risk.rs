use std::collections::BTreeMap;

use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portopt_core::risk_metrics::{compute_risk_metrics, risk_bucket, RiskMetrics};
use portopt_core::risk_model::{RiskModel, DEFAULT_VOLATILITY};

use crate::input;

/// Arguments for standalone risk metrics
#[derive(Args)]
pub struct RiskArgs {
    /// Path to a JSON file with weights and risk data
    #[arg(long)]
    pub input: Option<String>,

    /// Confidence level for VaR/CVaR (e.g. 0.95 for 95%)
    #[arg(long, default_value = "0.95")]
    pub confidence: Decimal,
}

/// A book to measure: weights by symbol, optional per-symbol expected
/// returns and volatilities, optional covariance in symbol-sorted order.
#[derive(Debug, Deserialize)]
struct RiskInput {
    weights: BTreeMap<String, Decimal>,
    #[serde(default)]
    expected_returns: BTreeMap<String, Decimal>,
    #[serde(default)]
    covariance: Option<Vec<Vec<Decimal>>>,
    #[serde(default)]
    volatilities: BTreeMap<String, Decimal>,
    #[serde(default)]
    transaction_cost_estimate: Decimal,
}

#[derive(Debug, Serialize)]
struct RiskReport {
    metrics: RiskMetrics,
    risk_profile: String,
    summary: String,
    warnings: Vec<String>,
}

pub fn run_risk(args: RiskArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let case: RiskInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input <file.json> or stdin required for risk".into());
    };

    if args.confidence <= Decimal::ZERO || args.confidence >= Decimal::ONE {
        return Err("--confidence must be between 0 and 1 (exclusive)".into());
    }

    // Symbol order follows the sorted weight map; the covariance, when
    // supplied, must use the same ordering.
    let symbols: Vec<String> = case.weights.keys().cloned().collect();
    let expected_returns: Vec<Decimal> = symbols
        .iter()
        .map(|s| case.expected_returns.get(s).copied().unwrap_or(Decimal::ZERO))
        .collect();
    let volatilities: Vec<Decimal> = symbols
        .iter()
        .map(|s| case.volatilities.get(s).copied().unwrap_or(DEFAULT_VOLATILITY))
        .collect();
    let (model, warnings) = RiskModel::build(case.covariance, &volatilities);

    let metrics = compute_risk_metrics(
        &case.weights,
        &symbols,
        &expected_returns,
        &model,
        case.transaction_cost_estimate,
        args.confidence,
    );

    let report = RiskReport {
        risk_profile: risk_bucket(metrics.volatility).to_string(),
        summary: metrics.summary(),
        metrics,
        warnings,
    };
    Ok(serde_json::to_value(report)?)
}
