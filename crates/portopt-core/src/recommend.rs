//! End-to-end recommendation pipeline: universe → scores → risk model →
//! constrained optimization → risk metrics → audit record.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{self, AuditRecord};
use crate::constraints::{ConstraintSet, OptimizationConstraints};
use crate::engine::{self, EngineConfig, OptimizationInputs};
use crate::error::PortfolioError;
use crate::providers::{PositionProvider, RiskDataProvider, ScoringProvider, UniverseProvider};
use crate::risk_metrics::{compute_risk_metrics, risk_bucket};
use crate::risk_model::{RiskModel, DEFAULT_VOLATILITY};
use crate::tcost::CostModel;
use crate::types::{with_metadata, ComputationOutput, PortfolioWeights};
use crate::universe::{
    align_expected_returns, InvestorProfile, StockScore, UniverseItem, BASELINE_EXPECTED_RETURN,
};
use crate::PortfolioResult;

fn default_min_universe() -> usize {
    8
}

/// One recommendation request. `model_version` and
/// `feature_view_version` pin the scoring artifacts for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub account_id: i64,
    /// Investor profile; requests without one are rejected.
    #[serde(default)]
    pub profile: Option<InvestorProfile>,
    /// Optional symbol filter; `None` optimizes the full universe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    /// Valuation date; defaults to today.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    #[serde(default)]
    pub constraints: OptimizationConstraints,
    #[serde(default)]
    pub engine: EngineConfig,
    pub model_version: String,
    pub feature_view_version: String,
    /// Caller-supplied idempotency key; derived from inputs when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Reject universes smaller than this after filters.
    #[serde(default = "default_min_universe")]
    pub min_universe_size: usize,
}

/// One line of the presentation table, derived from a solved weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingRecommendation {
    pub symbol: String,
    pub company_name: String,
    /// Allocation in percent, rounded to 2 decimals.
    pub allocation_pct: Decimal,
    pub reasoning: String,
    pub risk_level: String,
    /// Expected return in percent, rounded to 2 decimals.
    pub expected_return_pct: Decimal,
}

/// Constraint configuration echoed back with the solve status, so a
/// stored recommendation is interpretable without the original request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintReport {
    pub max_weight_per_name: Decimal,
    pub max_sector_weight: Decimal,
    pub max_turnover: Decimal,
    pub long_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta_target: Option<Decimal>,
    pub optimizer_status: String,
}

/// Complete recommendation: solved weights plus presentation, risk and
/// audit artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRecommendation {
    /// Final weights rounded to 6 decimals for persistence.
    pub weights: PortfolioWeights,
    /// Holdings sorted by weight, largest first.
    pub holdings: Vec<HoldingRecommendation>,
    /// Portfolio expected return in percent, rounded to 2 decimals.
    pub expected_portfolio_return_pct: Decimal,
    pub risk_profile: String,
    pub risk_assessment: String,
    pub constraint_report: ConstraintReport,
    pub risk_metrics: crate::risk_metrics::RiskMetrics,
    pub optimizer_status: String,
    pub audit: AuditRecord,
}

/// Run the full pipeline for one request.
///
/// Hard failures are limited to a missing profile, a too-small universe
/// and out-of-range constraint values. Everything downstream degrades:
/// unusable risk data falls back to a diagonal model, solver failures
/// fall back to the greedy heuristic, and total infeasibility surfaces
/// as an empty weight map with a warning.
pub fn recommend_portfolio<U, S, R, P>(
    universe_provider: &U,
    scoring_provider: &S,
    risk_data_provider: &R,
    position_provider: &P,
    request: &RecommendationRequest,
) -> PortfolioResult<ComputationOutput<PortfolioRecommendation>>
where
    U: UniverseProvider,
    S: ScoringProvider,
    R: RiskDataProvider,
    P: PositionProvider,
{
    let start = Instant::now();

    let profile = request
        .profile
        .as_ref()
        .ok_or(PortfolioError::MissingUserProfile)?;
    request.constraints.validate()?;

    let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());

    let universe = universe_provider.fetch_universe(
        request.symbols.as_deref(),
        as_of,
        request.constraints.min_liquidity_score,
    )?;
    if universe.len() < request.min_universe_size {
        return Err(PortfolioError::InsufficientUniverse {
            required: request.min_universe_size,
            available: universe.len(),
        });
    }

    let symbols: Vec<String> = universe.iter().map(|u| u.symbol.clone()).collect();
    let scores = scoring_provider.score(&universe, profile);
    let expected_returns = align_expected_returns(&universe, &scores);
    let cost_model = CostModel::from_universe(&universe);

    let covariance = risk_data_provider.covariance(&symbols, as_of);
    let volatilities: Vec<Decimal> = universe
        .iter()
        .map(|u| {
            risk_data_provider
                .volatility(&u.symbol, as_of)
                .unwrap_or(DEFAULT_VOLATILITY)
        })
        .collect();
    let (risk_model, mut warnings) = RiskModel::build(covariance.clone(), &volatilities);

    let previous = normalize_previous(position_provider.previous_weights(request.account_id));

    let betas = request
        .constraints
        .target_beta
        .and_then(|_| risk_data_provider.beta_vector(&symbols, as_of));
    let constraint_set = ConstraintSet::build(&universe, &request.constraints, betas)?;

    let inputs = OptimizationInputs {
        expected_returns: &expected_returns,
        risk_model: Some(&risk_model),
        cost_model: &cost_model,
        previous_weights: &previous,
        constraints: &constraint_set,
        risk_aversion: request.constraints.risk_aversion,
        cost_aversion: request.constraints.cost_aversion,
    };
    let report = engine::solve(&inputs, &request.engine);
    warnings.extend(report.warnings.iter().cloned());
    let optimizer_status = report.optimizer_status.clone();
    let weights = report.outcome.into_weights();

    let transaction_cost = cost_model.estimate(&weights, &previous);
    let mut metrics = compute_risk_metrics(
        &weights,
        &symbols,
        &expected_returns,
        &risk_model,
        transaction_cost,
        request.constraints.cvar_confidence,
    );
    if let Some(band) = &constraint_set.beta_band {
        let aligned: Vec<Decimal> = symbols
            .iter()
            .map(|s| weights.get(s).copied().unwrap_or(Decimal::ZERO))
            .collect();
        metrics.beta = Some(band.portfolio_beta(&aligned));
    }

    let idempotency_key = request.idempotency_key.clone().unwrap_or_else(|| {
        audit::request_key(
            request.account_id,
            &request.model_version,
            &request.feature_view_version,
            request.symbols.as_deref(),
            request.as_of,
            &request.constraints,
        )
    });
    let audit = AuditRecord {
        idempotency_key,
        as_of,
        model_version: request.model_version.clone(),
        feature_view_version: request.feature_view_version.clone(),
        universe_count: symbols.len(),
        inputs_hash: audit::inputs_hash(
            &symbols,
            &expected_returns,
            covariance.as_ref(),
            &request.constraints,
        ),
        prev_weights_nonzero: audit::nonzero_positions(&previous),
        optimizer_status: optimizer_status.clone(),
        transaction_cost_estimate: transaction_cost,
        created_at: Utc::now(),
    };

    let holdings = build_holdings(&weights, &universe, &scores, metrics.volatility);
    let rounded: PortfolioWeights = weights
        .iter()
        .map(|(symbol, weight)| (symbol.clone(), weight.round_dp(6)))
        .collect();

    let recommendation = PortfolioRecommendation {
        weights: rounded,
        holdings,
        expected_portfolio_return_pct: (dec!(100) * metrics.expected_return).round_dp(2),
        risk_profile: risk_bucket(metrics.volatility).to_string(),
        risk_assessment: metrics.summary(),
        constraint_report: ConstraintReport {
            max_weight_per_name: request.constraints.max_weight_per_name,
            max_sector_weight: request.constraints.max_sector_weight,
            max_turnover: request.constraints.max_turnover,
            long_only: request.constraints.long_only,
            beta_target: request.constraints.target_beta,
            optimizer_status: optimizer_status.clone(),
        },
        risk_metrics: metrics,
        optimizer_status,
        audit,
    };

    info!(
        account = request.account_id,
        universe = recommendation.audit.universe_count,
        status = %recommendation.optimizer_status,
        "portfolio recommendation generated"
    );

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Constrained Mean-Variance Portfolio Construction (cost-aware)",
        &serde_json::json!({
            "as_of": as_of.to_string(),
            "universe_count": symbols.len(),
            "risk_aversion": request.constraints.risk_aversion.to_string(),
            "cost_aversion": request.constraints.cost_aversion.to_string(),
            "solver_enabled": request.engine.solver_enabled,
        }),
        warnings,
        elapsed,
        recommendation,
    ))
}

/// Previous books arrive from persistence unnormalized; rescale to a
/// unit book so turnover is measured in comparable terms. Empty and
/// zero-total books pass through untouched (cold start).
fn normalize_previous(mut weights: PortfolioWeights) -> PortfolioWeights {
    let total: Decimal = weights.values().copied().sum();
    if total > Decimal::ZERO {
        for value in weights.values_mut() {
            *value /= total;
        }
    }
    weights
}

fn build_holdings(
    weights: &PortfolioWeights,
    universe: &[UniverseItem],
    scores: &[StockScore],
    portfolio_volatility: Decimal,
) -> Vec<HoldingRecommendation> {
    let by_symbol: BTreeMap<&str, &UniverseItem> =
        universe.iter().map(|u| (u.symbol.as_str(), u)).collect();
    let mut ranked: Vec<(&String, &Decimal)> = weights.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1));

    let risk_level = risk_bucket(portfolio_volatility);
    let mut holdings = Vec::with_capacity(ranked.len());
    for (symbol, weight) in ranked {
        let item = match by_symbol.get(symbol.as_str()) {
            Some(item) => *item,
            None => continue,
        };
        let expected = scores
            .iter()
            .find(|s| &s.symbol == symbol)
            .and_then(|s| s.expected_return)
            .unwrap_or(BASELINE_EXPECTED_RETURN);
        holdings.push(HoldingRecommendation {
            symbol: symbol.clone(),
            company_name: item.name.clone(),
            allocation_pct: (dec!(100) * *weight).round_dp(2),
            reasoning: format!(
                "Model score & optimizer selection (sector={})",
                item.sector_label()
            ),
            risk_level: risk_level.to_string(),
            expected_return_pct: (dec!(100) * expected).round_dp(2),
        });
    }
    holdings
}
