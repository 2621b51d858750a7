use std::collections::BTreeMap;

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::constraints::ConstraintSet;
use crate::error::SolverError;
use crate::risk_model::RiskModel;
use crate::types::PortfolioWeights;

use super::{normalize_nonnegative, EngineConfig, OptimizationInputs};

/// Initial gradient-ascent step.
const INITIAL_STEP: Decimal = dec!(0.005);

/// Step below which further refinement is noise.
const MIN_STEP: Decimal = dec!(0.0000000001);

/// Total weight movement per iteration under which we declare convergence.
const MOVEMENT_TOL: Decimal = dec!(0.000000001);

/// Objective improvement under this counts toward the stall counter.
const OBJECTIVE_TOL: Decimal = dec!(0.000000000001);

/// Stalled iterations before the step is halved.
const STALL_LIMIT: u32 = 200;

/// Projection rounds per gradient step.
const PROJECTION_ROUNDS: usize = 4;

/// Projection rounds applied to the final iterate before the audit.
const POLISH_ROUNDS: usize = 25;

/// |Δw| below this treats the sqrt-cost kink subgradient as zero.
const KINK_TOL: Decimal = dec!(0.000001);

/// Slack on the infeasibility prechecks, matching the constraint slack.
const PRECHECK_SLACK: Decimal = dec!(0.000000001);

/// Projected-gradient ascent on `μ·w − λ·wᵀΣw − γ·tcost(w)` over the
/// constraint set. Returns the status tag and the clamped, renormalized
/// weights; any infeasibility (proven up front or detected by the
/// post-solve audit) comes back as a [`SolverError`] for the dispatcher
/// to answer with the heuristic.
pub(crate) fn solve_convex(
    inputs: &OptimizationInputs<'_>,
    model: &RiskModel,
    config: &EngineConfig,
) -> Result<(&'static str, PortfolioWeights), SolverError> {
    let set = inputs.constraints;
    let n = set.len();
    let prev = inputs.previous_aligned();

    precheck_turnover(set, &prev)?;
    precheck_capacity(set)?;

    let spreads = inputs.cost_model.aligned_spreads(&set.symbols);
    let impacts = inputs.cost_model.aligned_impacts(&set.symbols);

    let objective = |w: &[Decimal]| -> Decimal {
        vec_dot(w, inputs.expected_returns)
            - inputs.risk_aversion * model.portfolio_variance(w)
            - inputs.cost_aversion * transaction_cost(w, &prev, &spreads, &impacts)
    };

    // Warm start from the previous book when it has mass.
    let prev_total: Decimal = prev.iter().copied().sum();
    let mut w: Vec<Decimal> = if prev_total > Decimal::ZERO {
        prev.iter().map(|p| *p / prev_total).collect()
    } else {
        equal_weights(n)
    };
    project(&mut w, set, &prev, PROJECTION_ROUNDS);

    let mut best_w = w.clone();
    let mut best_obj = objective(&w);
    let mut step = INITIAL_STEP;
    let mut stall = 0u32;
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let grad = ascent_gradient(&w, &prev, inputs, model, &spreads, &impacts);
        let mut w_next: Vec<Decimal> = w
            .iter()
            .zip(grad.iter())
            .map(|(wi, g)| *wi + step * *g)
            .collect();
        project(&mut w_next, set, &prev, PROJECTION_ROUNDS);

        let movement: Decimal = w_next
            .iter()
            .zip(w.iter())
            .map(|(a, b)| (*a - *b).abs())
            .sum();
        w = w_next;

        let obj = objective(&w);
        if obj > best_obj + OBJECTIVE_TOL {
            stall = 0;
        } else {
            stall += 1;
        }
        if obj > best_obj {
            best_obj = obj;
            best_w = w.clone();
        }

        if movement < MOVEMENT_TOL {
            converged = true;
            break;
        }
        if stall >= STALL_LIMIT {
            step /= dec!(2);
            stall = 0;
            if step < MIN_STEP {
                converged = true;
                break;
            }
        }
    }

    project(&mut best_w, set, &prev, POLISH_ROUNDS);

    let violations = set.violations(&best_w, &prev);
    if !violations.is_empty() {
        return Err(SolverError::Infeasible {
            reason: violations.join("; "),
        });
    }

    // Negative numerical noise is clamped to zero and the vector
    // renormalized to sum to 1.
    let raw: BTreeMap<String, Decimal> = set
        .symbols
        .iter()
        .cloned()
        .zip(best_w.iter().copied())
        .collect();
    let weights = normalize_nonnegative(raw);
    if weights.is_empty() {
        return Err(SolverError::Numerical {
            reason: "solution collapsed to zero total weight".to_string(),
        });
    }

    Ok((
        if converged { "OPTIMAL" } else { "MAX_ITERATIONS" },
        weights,
    ))
}

// ---------------------------------------------------------------------------
// Infeasibility prechecks
// ---------------------------------------------------------------------------

/// Any full-budget portfolio trades at least |1 − Σprev|; a smaller
/// turnover budget is provably infeasible (a cold book needs ≥ 1).
fn precheck_turnover(set: &ConstraintSet, prev: &[Decimal]) -> Result<(), SolverError> {
    let prev_total: Decimal = prev.iter().copied().sum();
    let minimum_turnover = (Decimal::ONE - prev_total).abs();
    if minimum_turnover > set.turnover_cap + PRECHECK_SLACK {
        return Err(SolverError::Infeasible {
            reason: format!(
                "turnover cap {} cannot fund the budget from a book holding {}",
                set.turnover_cap, prev_total
            ),
        });
    }
    Ok(())
}

/// Long-only capacity bound: Σ over sectors of min(sector cap, names ·
/// name cap) must reach the budget.
fn precheck_capacity(set: &ConstraintSet) -> Result<(), SolverError> {
    if set.lower_bound < Decimal::ZERO {
        // Shorts can fund extra longs; no simple capacity bound applies.
        return Ok(());
    }
    let capacity: Decimal = match set.sector_cap {
        Some(cap) => set
            .sector_groups
            .values()
            .map(|indices| (Decimal::from(indices.len() as i64) * set.name_cap).min(cap))
            .sum(),
        None => Decimal::from(set.len() as i64) * set.name_cap,
    };
    if capacity < Decimal::ONE - PRECHECK_SLACK {
        return Err(SolverError::Infeasible {
            reason: format!("name and sector caps can fund at most {capacity} of the budget"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Objective pieces
// ---------------------------------------------------------------------------

fn ascent_gradient(
    w: &[Decimal],
    prev: &[Decimal],
    inputs: &OptimizationInputs<'_>,
    model: &RiskModel,
    spreads: &[Decimal],
    impacts: &[Decimal],
) -> Vec<Decimal> {
    let risk_grad = model.variance_gradient(w);
    (0..w.len())
        .map(|i| {
            let cost_grad = cost_gradient(w[i] - prev[i], spreads[i], impacts[i]);
            inputs.expected_returns[i]
                - inputs.risk_aversion * risk_grad[i]
                - inputs.cost_aversion * cost_grad
        })
        .collect()
}

/// d/dΔ of spread·|Δ| + impact·sqrt(|Δ|); the sqrt kink at Δ = 0 takes
/// the zero subgradient.
fn cost_gradient(delta: Decimal, spread: Decimal, impact: Decimal) -> Decimal {
    if delta.abs() < KINK_TOL {
        return Decimal::ZERO;
    }
    let sign = if delta > Decimal::ZERO {
        Decimal::ONE
    } else {
        -Decimal::ONE
    };
    sign * (spread + impact / (dec!(2) * sqrt_decimal(delta.abs())))
}

fn transaction_cost(
    w: &[Decimal],
    prev: &[Decimal],
    spreads: &[Decimal],
    impacts: &[Decimal],
) -> Decimal {
    (0..w.len())
        .map(|i| {
            let traded = (w[i] - prev[i]).abs();
            traded * spreads[i] + sqrt_decimal(traded) * impacts[i]
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Sequential projection: box and sector rounds with a budget rebalance,
/// then the beta nudge, then the turnover shrink toward the previous
/// book. The shrink runs last because it preserves the budget whenever
/// both endpoints sum to 1.
fn project(w: &mut [Decimal], set: &ConstraintSet, prev: &[Decimal], rounds: usize) {
    for _ in 0..rounds {
        clamp_box(w, set);
        scale_sectors(w, set);
        rebalance_budget(w, set);
    }
    if nudge_beta(w, set) {
        for _ in 0..2 {
            clamp_box(w, set);
            scale_sectors(w, set);
            rebalance_budget(w, set);
        }
    }
    shrink_turnover(w, set, prev);
}

fn clamp_box(w: &mut [Decimal], set: &ConstraintSet) {
    let upper = set.name_cap.max(set.lower_bound);
    for wi in w.iter_mut() {
        *wi = (*wi).clamp(set.lower_bound, upper);
    }
}

fn scale_sectors(w: &mut [Decimal], set: &ConstraintSet) {
    let Some(cap) = set.sector_cap else {
        return;
    };
    for indices in set.sector_groups.values() {
        let total: Decimal = indices.iter().map(|&i| w[i]).sum();
        if total > cap && total > Decimal::ZERO {
            let scale = cap / total;
            for &i in indices {
                w[i] *= scale;
            }
        }
    }
}

/// Scales an over-allocated book down; spreads any deficit uniformly
/// over the names still below their cap, re-clamping as caps saturate.
/// The uniform shift keeps interior fixed points at the true optimum.
fn rebalance_budget(w: &mut [Decimal], set: &ConstraintSet) {
    let total: Decimal = w.iter().copied().sum();
    if total > Decimal::ONE {
        for wi in w.iter_mut() {
            *wi /= total;
        }
        return;
    }

    let upper = set.name_cap.max(set.lower_bound);
    let mut deficit = Decimal::ONE - total;
    // Each pass either exhausts the deficit or saturates another cap.
    for _ in 0..w.len() {
        if deficit <= Decimal::ZERO {
            break;
        }
        let free = w.iter().filter(|wi| **wi < upper).count();
        if free == 0 {
            break;
        }
        let share = deficit / Decimal::from(free as i64);
        deficit = Decimal::ZERO;
        for wi in w.iter_mut() {
            if *wi >= upper {
                continue;
            }
            let lifted = (*wi + share).min(upper);
            deficit += share - (lifted - *wi);
            *wi = lifted;
        }
    }
}

/// Budget-preserving shift along the centered beta vector onto the
/// nearest band edge. Returns false when no adjustment was needed (or
/// none is possible because every beta is identical).
fn nudge_beta(w: &mut [Decimal], set: &ConstraintSet) -> bool {
    let Some(band) = &set.beta_band else {
        return false;
    };
    let beta = band.portfolio_beta(w);
    let target = if beta < band.lower {
        band.lower
    } else if beta > band.upper {
        band.upper
    } else {
        return false;
    };

    let count = Decimal::from(w.len() as i64);
    let mean: Decimal = band.betas.iter().copied().sum::<Decimal>() / count;
    let direction: Vec<Decimal> = band.betas.iter().map(|b| *b - mean).collect();
    let denom = vec_dot(&band.betas, &direction);
    if denom == Decimal::ZERO {
        // All betas equal: the budget pins portfolio beta, nothing to do.
        return false;
    }

    let t = (target - beta) / denom;
    for (wi, d) in w.iter_mut().zip(direction.iter()) {
        *wi += t * *d;
    }
    true
}

fn shrink_turnover(w: &mut [Decimal], set: &ConstraintSet, prev: &[Decimal]) {
    let turnover: Decimal = w
        .iter()
        .zip(prev.iter())
        .map(|(wi, p)| (*wi - *p).abs())
        .sum();
    if turnover > set.turnover_cap && turnover > Decimal::ZERO {
        let scale = set.turnover_cap / turnover;
        for (wi, p) in w.iter_mut().zip(prev.iter()) {
            *wi = *p + scale * (*wi - *p);
        }
    }
}

// ---------------------------------------------------------------------------
// Math helpers
// ---------------------------------------------------------------------------

fn equal_weights(n: usize) -> Vec<Decimal> {
    let w = Decimal::ONE / Decimal::from(n as i64);
    vec![w; n]
}

fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::OptimizationConstraints;
    use crate::tcost::CostModel;
    use crate::universe::UniverseItem;
    use pretty_assertions::assert_eq;

    const SECTORS: [&str; 4] = ["Tech", "Energy", "Health", "Finance"];

    fn universe(n: usize) -> Vec<UniverseItem> {
        (0..n)
            .map(|i| UniverseItem {
                id: i as i64,
                symbol: format!("S{i:02}"),
                name: format!("Security {i}"),
                sector: Some(SECTORS[i % SECTORS.len()].to_string()),
                price: dec!(100),
                liquidity_score: dec!(1000),
            })
            .collect()
    }

    fn descending_mu(n: usize) -> Vec<Decimal> {
        (0..n)
            .map(|i| dec!(0.15) - Decimal::from(i as i64) * dec!(0.005))
            .collect()
    }

    fn equal_book(symbols: &[String]) -> BTreeMap<String, Decimal> {
        let w = Decimal::ONE / Decimal::from(symbols.len() as i64);
        symbols.iter().map(|s| (s.clone(), w)).collect()
    }

    struct Fixture {
        universe: Vec<UniverseItem>,
        mu: Vec<Decimal>,
        model: RiskModel,
        cost: CostModel,
        constraints: OptimizationConstraints,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let universe = universe(n);
            let cost = CostModel::from_universe(&universe);
            let model = RiskModel::from_volatilities(&vec![dec!(0.2); n]);
            Fixture {
                mu: descending_mu(n),
                universe,
                model,
                cost,
                constraints: OptimizationConstraints::default(),
            }
        }

        fn solve(
            &self,
            previous: &BTreeMap<String, Decimal>,
            config: &EngineConfig,
        ) -> Result<(&'static str, PortfolioWeights), SolverError> {
            let set = ConstraintSet::build(&self.universe, &self.constraints, None).unwrap();
            let inputs = OptimizationInputs {
                expected_returns: &self.mu,
                risk_model: Some(&self.model),
                cost_model: &self.cost,
                previous_weights: previous,
                constraints: &set,
                risk_aversion: self.constraints.risk_aversion,
                cost_aversion: self.constraints.cost_aversion,
            };
            solve_convex(&inputs, &self.model, config)
        }
    }

    fn assert_close(actual: Decimal, expected: Decimal, tolerance: Decimal, label: &str) {
        let diff = (actual - expected).abs();
        assert!(
            diff <= tolerance,
            "{label}: expected {expected}, got {actual} (diff {diff})"
        );
    }

    // -----------------------------------------------------------------
    // Prechecks
    // -----------------------------------------------------------------

    #[test]
    fn test_cold_book_with_small_turnover_cap_is_infeasible() {
        let fixture = Fixture::new(12);
        let err = fixture
            .solve(&BTreeMap::new(), &EngineConfig::default())
            .expect_err("a flat book cannot be funded under a 25% turnover cap");
        assert!(matches!(err, SolverError::Infeasible { .. }));
        assert!(err.to_string().contains("turnover cap"));
    }

    #[test]
    fn test_insufficient_cap_capacity_is_infeasible() {
        // 5 names at a 10% cap place at most half the budget.
        let mut fixture = Fixture::new(5);
        fixture.constraints.max_sector_weight = dec!(1);
        fixture.constraints.max_turnover = dec!(2);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let err = fixture
            .solve(&equal_book(&symbols), &EngineConfig::default())
            .expect_err("caps fund only 0.5 of the budget");
        assert!(err.to_string().contains("caps can fund"));
    }

    // -----------------------------------------------------------------
    // Solve paths
    // -----------------------------------------------------------------

    #[test]
    fn test_warm_book_solves_within_all_constraints() {
        let fixture = Fixture::new(12);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let previous = equal_book(&symbols);
        let (status, weights) = fixture
            .solve(&previous, &EngineConfig::default())
            .expect("equal book under default constraints is feasible");

        assert!(status == "OPTIMAL" || status == "MAX_ITERATIONS");
        let total: Decimal = weights.values().copied().sum();
        assert_close(total, Decimal::ONE, dec!(0.000001), "budget");
        for (symbol, weight) in &weights {
            assert!(
                *weight <= dec!(0.100001),
                "{symbol} exceeds the name cap: {weight}"
            );
            assert!(*weight >= Decimal::ZERO, "{symbol} went short: {weight}");
        }
        let turnover: Decimal = symbols
            .iter()
            .map(|s| {
                let new = weights.get(s).copied().unwrap_or(Decimal::ZERO);
                (new - previous[s]).abs()
            })
            .sum();
        assert!(
            turnover <= dec!(0.250001),
            "turnover cap violated: {turnover}"
        );
        let mut sector_totals: BTreeMap<&str, Decimal> = BTreeMap::new();
        for item in &fixture.universe {
            let weight = weights.get(&item.symbol).copied().unwrap_or(Decimal::ZERO);
            *sector_totals
                .entry(item.sector.as_deref().unwrap_or("Unknown"))
                .or_insert(Decimal::ZERO) += weight;
        }
        for (sector, sum) in &sector_totals {
            assert!(
                *sum <= dec!(0.300001),
                "{sector} exceeds the sector cap: {sum}"
            );
        }
    }

    #[test]
    fn test_symmetric_problem_converges_immediately() {
        // Identical names and a symmetric warm start form a fixed point:
        // the first iteration moves nothing and the solver reports OPTIMAL.
        let mut fixture = Fixture::new(2);
        fixture.mu = vec![dec!(0.10), dec!(0.10)];
        fixture.universe[1].sector = fixture.universe[0].sector.clone();
        fixture.constraints.max_weight_per_name = dec!(0.6);
        fixture.constraints.max_sector_weight = dec!(1);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let (status, weights) = fixture
            .solve(&equal_book(&symbols), &EngineConfig::default())
            .expect("symmetric two-name problem is feasible");

        assert_eq!(status, "OPTIMAL");
        assert_close(weights["S00"], dec!(0.5), dec!(0.000001), "S00");
        assert_close(weights["S01"], dec!(0.5), dec!(0.000001), "S01");
    }

    #[test]
    fn test_iteration_cap_reports_max_iterations() {
        let mut fixture = Fixture::new(12);
        fixture.constraints.max_turnover = dec!(2);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let config = EngineConfig {
            max_iterations: 1,
            ..EngineConfig::default()
        };
        let (status, _) = fixture
            .solve(&equal_book(&symbols), &config)
            .expect("feasible start stays feasible after one iteration");
        assert_eq!(status, "MAX_ITERATIONS");
    }

    #[test]
    fn test_binding_turnover_is_respected() {
        let mut fixture = Fixture::new(12);
        fixture.constraints.max_turnover = dec!(0.05);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let previous = equal_book(&symbols);
        let (_, weights) = fixture
            .solve(&previous, &EngineConfig::default())
            .expect("staying near the previous book is always feasible here");

        let turnover: Decimal = symbols
            .iter()
            .map(|s| {
                let new = weights.get(s).copied().unwrap_or(Decimal::ZERO);
                (new - previous[s]).abs()
            })
            .sum();
        assert!(
            turnover <= dec!(0.050001),
            "turnover cap violated: {turnover}"
        );
    }

    #[test]
    fn test_sector_cap_binds_names_sharing_a_sector() {
        // S00 and S04 share Tech; the 40% name cap would admit either one
        // alone, but together they must stay under the 30% sector cap.
        let mut fixture = Fixture::new(5);
        fixture.mu = vec![dec!(0.20), dec!(0.06), dec!(0.05), dec!(0.04), dec!(0.18)];
        fixture.constraints.max_weight_per_name = dec!(0.4);
        fixture.constraints.max_turnover = dec!(2);
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let (status, weights) = fixture
            .solve(&equal_book(&symbols), &EngineConfig::default())
            .expect("caps leave 1.2 of capacity, so the budget places");

        assert!(status == "OPTIMAL" || status == "MAX_ITERATIONS");
        let total: Decimal = weights.values().copied().sum();
        assert_close(total, Decimal::ONE, dec!(0.000001), "budget");
        let tech = weights["S00"] + weights["S04"];
        assert!(tech <= dec!(0.300001), "Tech exceeds the sector cap: {tech}");
        assert!(tech >= dec!(0.29), "the Tech cap should bind: {tech}");
        for (symbol, weight) in &weights {
            assert!(
                *weight <= dec!(0.400001),
                "{symbol} exceeds the name cap: {weight}"
            );
        }
    }

    #[test]
    fn test_concentrated_book_under_tight_turnover_is_infeasible() {
        // A single-name book cannot spread below the 10% cap while trading
        // only 25% of NAV; the audit reports it instead of returning a
        // cap-violating portfolio.
        let fixture = Fixture::new(12);
        let mut previous = BTreeMap::new();
        previous.insert("S00".to_string(), Decimal::ONE);
        let err = fixture
            .solve(&previous, &EngineConfig::default())
            .expect_err("cap and turnover conflict");
        assert!(matches!(err, SolverError::Infeasible { .. }));
    }

    #[test]
    fn test_beta_band_holds_on_the_solution() {
        // betas [0.5, 1.5] with a 1.0 target: μ pulls toward the low-beta
        // name, and the band keeps portfolio beta within ±0.05.
        let mut fixture = Fixture::new(2);
        fixture.mu = vec![dec!(0.15), dec!(0.05)];
        fixture.constraints.max_weight_per_name = dec!(0.6);
        fixture.constraints.max_sector_weight = dec!(1);
        fixture.constraints.target_beta = Some(dec!(1));
        let set = ConstraintSet::build(
            &fixture.universe,
            &fixture.constraints,
            Some(vec![dec!(0.5), dec!(1.5)]),
        )
        .unwrap();
        let symbols: Vec<String> = fixture.universe.iter().map(|u| u.symbol.clone()).collect();
        let previous = equal_book(&symbols);
        let inputs = OptimizationInputs {
            expected_returns: &fixture.mu,
            risk_model: Some(&fixture.model),
            cost_model: &fixture.cost,
            previous_weights: &previous,
            constraints: &set,
            risk_aversion: fixture.constraints.risk_aversion,
            cost_aversion: fixture.constraints.cost_aversion,
        };
        let (_, weights) =
            solve_convex(&inputs, &fixture.model, &EngineConfig::default()).expect("feasible");

        let beta = dec!(0.5) * weights["S00"] + dec!(1.5) * weights["S01"];
        assert!(
            beta >= dec!(0.949999) && beta <= dec!(1.050001),
            "beta {beta} escaped the band"
        );
        // μ favors the low-beta name until the lower band edge binds, which
        // pins the book at beta 0.95 exactly.
        assert_close(weights["S00"], dec!(0.55), dec!(0.0001), "low-beta weight");
        assert_close(weights["S01"], dec!(0.45), dec!(0.0001), "high-beta weight");
    }
}
