use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::constraints::ConstraintSet;
use crate::risk_model::RiskModel;
use crate::types::PortfolioWeights;

/// Per-name risk assumed when no risk model is present.
const DEFAULT_RISK: Decimal = dec!(0.05);

/// Floor applied to risk before dividing, keeping scores bounded.
const SCORE_RISK_FLOOR: Decimal = dec!(0.0001);

/// Cumulative allocation at which the greedy loop stops.
const BUDGET_STOP: Decimal = dec!(0.999999);

/// Greedy risk-adjusted allocator used when the convex path is
/// unavailable or fails.
///
/// Names are ranked by `μ / max(1e-4, risk)` with ties keeping original
/// universe order, then each receives up to the per-name cap, clipped to
/// its sector's remaining headroom. Turnover and beta constraints are not
/// enforced on this path; that is a deliberate limitation of the
/// last-resort allocator, recorded in the status string. Weights are
/// renormalized to sum to 1; if nothing could be allocated the map is
/// empty.
pub fn solve_heuristic(
    expected_returns: &[Decimal],
    risk_model: Option<&RiskModel>,
    constraints: &ConstraintSet,
) -> PortfolioWeights {
    let n = constraints.len();

    let scores: Vec<Decimal> = (0..n)
        .map(|i| {
            let risk = risk_model
                .map(|m| m.per_name_risk(i))
                .unwrap_or(DEFAULT_RISK);
            expected_returns[i] / risk.max(SCORE_RISK_FLOOR)
        })
        .collect();

    // Stable sort: equal scores keep universe order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].cmp(&scores[a]));

    let mut sector_of: Vec<&str> = vec![""; n];
    for (sector, indices) in &constraints.sector_groups {
        for &i in indices {
            sector_of[i] = sector.as_str();
        }
    }

    let mut allocation: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut sector_usage: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut total = Decimal::ZERO;

    for idx in order {
        let sector = sector_of[idx];
        let mut can_add = constraints.name_cap;
        if let Some(cap) = constraints.sector_cap {
            let used = sector_usage.get(sector).copied().unwrap_or(Decimal::ZERO);
            if used + can_add > cap {
                can_add = (cap - used).max(Decimal::ZERO);
            }
        }
        if can_add <= Decimal::ZERO {
            continue;
        }
        allocation.insert(constraints.symbols[idx].clone(), can_add);
        *sector_usage.entry(sector).or_insert(Decimal::ZERO) += can_add;
        total += can_add;
        if total >= BUDGET_STOP {
            break;
        }
    }

    super::normalize_nonnegative(allocation)
}
