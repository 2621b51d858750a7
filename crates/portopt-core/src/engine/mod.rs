//! Optimization engine: convex path with heuristic fallback.
//!
//! The convex path runs a projected-gradient ascent on the full objective
//! and audits its result against every constraint; any diagnosis it
//! produces is caught here, logged, and answered with the greedy
//! heuristic. Callers never observe a solver failure directly — only
//! `optimizer_status` distinguishes the paths.

mod heuristic;
mod solver;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constraints::ConstraintSet;
use crate::risk_model::RiskModel;
use crate::tcost::CostModel;
use crate::types::{PortfolioWeights, Weight};

pub use heuristic::solve_heuristic;

/// Engine knobs. `solver_enabled` is the capability check: environments
/// without a working convex path set it false and get the heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub solver_enabled: bool,
    pub max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            solver_enabled: true,
            max_iterations: 20_000,
        }
    }
}

/// Everything one solve needs, aligned to `constraints.symbols` order.
#[derive(Debug, Clone)]
pub struct OptimizationInputs<'a> {
    pub expected_returns: &'a [Decimal],
    pub risk_model: Option<&'a RiskModel>,
    pub cost_model: &'a CostModel,
    pub previous_weights: &'a BTreeMap<String, Weight>,
    pub constraints: &'a ConstraintSet,
    /// λ in μ·w - λ·wᵀΣw.
    pub risk_aversion: Decimal,
    /// γ multiplying the transaction-cost penalty.
    pub cost_aversion: Decimal,
}

impl OptimizationInputs<'_> {
    /// Previous weights aligned to universe order; absent symbols are flat.
    pub fn previous_aligned(&self) -> Vec<Decimal> {
        self.constraints
            .symbols
            .iter()
            .map(|s| self.previous_weights.get(s).copied().unwrap_or(Decimal::ZERO))
            .collect()
    }
}

/// Which path produced the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SolveOutcome {
    Solved {
        status: String,
        weights: PortfolioWeights,
    },
    Heuristic {
        weights: PortfolioWeights,
    },
}

impl SolveOutcome {
    pub fn weights(&self) -> &PortfolioWeights {
        match self {
            SolveOutcome::Solved { weights, .. } => weights,
            SolveOutcome::Heuristic { weights } => weights,
        }
    }

    pub fn into_weights(self) -> PortfolioWeights {
        match self {
            SolveOutcome::Solved { weights, .. } => weights,
            SolveOutcome::Heuristic { weights } => weights,
        }
    }
}

/// Solve outcome plus the audit-facing status string and any degradation
/// warnings picked up along the way.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub outcome: SolveOutcome,
    /// `"solver/OPTIMAL"`, `"solver/INFEASIBLE"`, `"heuristic"`, ...
    pub optimizer_status: String,
    pub warnings: Vec<String>,
}

/// Runs the convex path when it is available and a risk model exists,
/// falling back to the greedy heuristic otherwise. A solver failure keeps
/// its diagnosis in `optimizer_status` even though the weights come from
/// the fallback.
pub fn solve(inputs: &OptimizationInputs<'_>, config: &EngineConfig) -> SolveReport {
    let mut warnings = Vec::new();

    if config.solver_enabled {
        if let Some(model) = inputs.risk_model {
            match solver::solve_convex(inputs, model, config) {
                Ok((status_tag, weights)) => {
                    let status = format!("solver/{status_tag}");
                    return SolveReport {
                        optimizer_status: status.clone(),
                        outcome: SolveOutcome::Solved { status, weights },
                        warnings,
                    };
                }
                Err(err) => {
                    warn!(error = %err, "convex solver failed, falling back to heuristic");
                    warnings.push(format!(
                        "Convex solver failed ({err}); heuristic fallback engaged"
                    ));
                    let weights = solve_heuristic(
                        inputs.expected_returns,
                        inputs.risk_model,
                        inputs.constraints,
                    );
                    if weights.is_empty() {
                        warnings.push(TOTAL_INFEASIBILITY_WARNING.to_string());
                    }
                    return SolveReport {
                        optimizer_status: format!("solver/{}", err.status_tag()),
                        outcome: SolveOutcome::Heuristic { weights },
                        warnings,
                    };
                }
            }
        }
    }

    let weights = solve_heuristic(inputs.expected_returns, inputs.risk_model, inputs.constraints);
    if weights.is_empty() {
        warnings.push(TOTAL_INFEASIBILITY_WARNING.to_string());
    }
    SolveReport {
        optimizer_status: "heuristic".to_string(),
        outcome: SolveOutcome::Heuristic { weights },
        warnings,
    }
}

const TOTAL_INFEASIBILITY_WARNING: &str =
    "Total infeasibility: constraint caps leave no weight to allocate; returning empty weights";

/// Clamps negatives to zero and rescales to sum to 1. An all-zero input
/// yields the empty map (total infeasibility).
pub(crate) fn normalize_nonnegative(raw: BTreeMap<String, Decimal>) -> PortfolioWeights {
    let clamped: BTreeMap<String, Decimal> = raw
        .into_iter()
        .map(|(sym, w)| (sym, w.max(Decimal::ZERO)))
        .collect();
    let total: Decimal = clamped.values().copied().sum();
    if total <= Decimal::ZERO {
        return BTreeMap::new();
    }
    clamped.into_iter().map(|(sym, w)| (sym, w / total)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_clamps_then_rescales() {
        let raw: BTreeMap<String, Decimal> = [
            ("AAA".to_string(), dec!(0.3)),
            ("BBB".to_string(), dec!(-0.1)),
            ("CCC".to_string(), dec!(0.3)),
        ]
        .into_iter()
        .collect();
        let normalized = normalize_nonnegative(raw);
        assert_eq!(normalized["AAA"], dec!(0.5));
        assert_eq!(normalized["BBB"], Decimal::ZERO);
        assert_eq!(normalized["CCC"], dec!(0.5));
    }

    #[test]
    fn test_all_nonpositive_input_yields_empty_map() {
        let raw: BTreeMap<String, Decimal> =
            [("AAA".to_string(), dec!(-0.2)), ("BBB".to_string(), Decimal::ZERO)]
                .into_iter()
                .collect();
        assert!(normalize_nonnegative(raw).is_empty());
    }
}
