use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PortfolioError;
use crate::universe::UniverseItem;
use crate::PortfolioResult;

/// Sector caps at or above this value are treated as disabled.
const SECTOR_CAP_DISABLE_THRESHOLD: Decimal = dec!(0.999);

/// Half-width of the beta tolerance band around the target.
const BETA_BAND_HALF_WIDTH: Decimal = dec!(0.05);

/// Lower bound per name when modest shorts are allowed.
const SHORT_FLOOR: Decimal = dec!(-0.10);

/// Tolerance for post-solve feasibility checks.
pub const FEASIBILITY_TOL: Decimal = dec!(0.000001);

/// Optimization constraints with documented defaults. Every field has a
/// firm value; deserialization fills missing fields from [`Default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConstraints {
    /// Per-name weight cap (default 10%).
    pub max_weight_per_name: Decimal,
    /// Cap on any one sector's total weight (default 30%).
    pub max_sector_weight: Decimal,
    /// Max fraction of NAV traded per rebalance, Σ|w - w_prev| (default 25%).
    pub max_turnover: Decimal,
    /// Names below this liquidity score are dropped from the universe.
    pub min_liquidity_score: Decimal,
    /// Optional portfolio beta target; enforced as target ± 0.05.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_beta: Option<Decimal>,
    /// λ in μ·w - λ·wᵀΣw (default 5).
    pub risk_aversion: Decimal,
    /// γ multiplying the transaction-cost penalty (default 1).
    pub cost_aversion: Decimal,
    /// Confidence level for CVaR reporting (default 95%).
    pub cvar_confidence: Decimal,
    /// No short selling (default true). When false, names may go to -10%.
    pub long_only: bool,
}

impl Default for OptimizationConstraints {
    fn default() -> Self {
        OptimizationConstraints {
            max_weight_per_name: dec!(0.10),
            max_sector_weight: dec!(0.30),
            max_turnover: dec!(0.25),
            min_liquidity_score: Decimal::ZERO,
            target_beta: None,
            risk_aversion: dec!(5),
            cost_aversion: dec!(1),
            cvar_confidence: dec!(0.95),
            long_only: true,
        }
    }
}

impl OptimizationConstraints {
    /// Range checks on caller-supplied values. Inconsistent combinations
    /// (e.g. a sector cap below the name cap) pass validation; they only
    /// shrink the feasible set.
    pub fn validate(&self) -> PortfolioResult<()> {
        if self.max_weight_per_name <= Decimal::ZERO || self.max_weight_per_name > Decimal::ONE {
            return Err(PortfolioError::InvalidInput {
                field: "max_weight_per_name".to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if self.max_sector_weight <= Decimal::ZERO || self.max_sector_weight > Decimal::ONE {
            return Err(PortfolioError::InvalidInput {
                field: "max_sector_weight".to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if self.max_turnover < Decimal::ZERO || self.max_turnover > Decimal::ONE {
            return Err(PortfolioError::InvalidInput {
                field: "max_turnover".to_string(),
                reason: "must be in [0, 1]".to_string(),
            });
        }
        if self.min_liquidity_score < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: "min_liquidity_score".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        if self.risk_aversion < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: "risk_aversion".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        if self.cost_aversion < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: "cost_aversion".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        if self.cvar_confidence <= Decimal::ZERO || self.cvar_confidence >= Decimal::ONE {
            return Err(PortfolioError::InvalidInput {
                field: "cvar_confidence".to_string(),
                reason: "must be between 0 and 1 (exclusive)".to_string(),
            });
        }
        Ok(())
    }
}

/// Beta tolerance band, present only when a target is set and the risk
/// service supplied a beta vector of the right length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetaBand {
    pub betas: Vec<Decimal>,
    pub lower: Decimal,
    pub upper: Decimal,
}

impl BetaBand {
    pub fn portfolio_beta(&self, weights: &[Decimal]) -> Decimal {
        self.betas
            .iter()
            .zip(weights.iter())
            .map(|(b, w)| *b * *w)
            .sum()
    }
}

/// Solver-ready feasible set derived from the universe and the typed
/// constraints: bounds, sector groups, turnover budget, beta band.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub symbols: Vec<String>,
    pub lower_bound: Decimal,
    pub name_cap: Decimal,
    /// None when the configured cap is high enough to never bind.
    pub sector_cap: Option<Decimal>,
    pub sector_groups: BTreeMap<String, Vec<usize>>,
    pub turnover_cap: Decimal,
    pub beta_band: Option<BetaBand>,
}

impl ConstraintSet {
    pub fn build(
        universe: &[UniverseItem],
        constraints: &OptimizationConstraints,
        betas: Option<Vec<Decimal>>,
    ) -> PortfolioResult<Self> {
        if universe.is_empty() {
            return Err(PortfolioError::InsufficientUniverse {
                required: 1,
                available: 0,
            });
        }

        let symbols: Vec<String> = universe.iter().map(|u| u.symbol.clone()).collect();

        let mut sector_groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, item) in universe.iter().enumerate() {
            sector_groups
                .entry(item.sector_label().to_string())
                .or_default()
                .push(idx);
        }

        let sector_cap = if constraints.max_sector_weight < SECTOR_CAP_DISABLE_THRESHOLD {
            Some(constraints.max_sector_weight)
        } else {
            None
        };

        let beta_band = match (constraints.target_beta, betas) {
            (Some(target), Some(betas)) if betas.len() == universe.len() => Some(BetaBand {
                betas,
                lower: (target - BETA_BAND_HALF_WIDTH).max(Decimal::ZERO),
                upper: target + BETA_BAND_HALF_WIDTH,
            }),
            (Some(_), Some(betas)) => {
                debug!(
                    expected = universe.len(),
                    got = betas.len(),
                    "beta vector length mismatch, dropping beta band"
                );
                None
            }
            _ => None,
        };

        Ok(ConstraintSet {
            symbols,
            lower_bound: if constraints.long_only {
                Decimal::ZERO
            } else {
                SHORT_FLOOR
            },
            name_cap: constraints.max_weight_per_name,
            sector_cap,
            sector_groups,
            turnover_cap: constraints.max_turnover,
            beta_band,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Weight of each sector under `weights`, keyed by sector label.
    pub fn sector_weights(&self, weights: &[Decimal]) -> BTreeMap<String, Decimal> {
        self.sector_groups
            .iter()
            .map(|(sector, indices)| {
                let total: Decimal = indices.iter().map(|&i| weights[i]).sum();
                (sector.clone(), total)
            })
            .collect()
    }

    /// Checks every constraint at the feasibility tolerance. Returns one
    /// message per violated constraint; an empty vec means feasible.
    pub fn violations(&self, weights: &[Decimal], previous: &[Decimal]) -> Vec<String> {
        let mut out = Vec::new();

        for (i, w) in weights.iter().enumerate() {
            if *w < self.lower_bound - FEASIBILITY_TOL {
                out.push(format!("{} below lower bound: {w}", self.symbols[i]));
            }
            if *w > self.name_cap + FEASIBILITY_TOL {
                out.push(format!("{} above name cap: {w}", self.symbols[i]));
            }
        }

        let total: Decimal = weights.iter().copied().sum();
        if (total - Decimal::ONE).abs() > FEASIBILITY_TOL {
            out.push(format!("budget not met: weights sum to {total}"));
        }

        if let Some(cap) = self.sector_cap {
            for (sector, weight) in self.sector_weights(weights) {
                if weight > cap + FEASIBILITY_TOL {
                    out.push(format!("sector {sector} above cap: {weight}"));
                }
            }
        }

        let turnover: Decimal = weights
            .iter()
            .zip(previous.iter())
            .map(|(w, p)| (*w - *p).abs())
            .sum();
        if turnover > self.turnover_cap + FEASIBILITY_TOL {
            out.push(format!("turnover {turnover} above cap {}", self.turnover_cap));
        }

        if let Some(band) = &self.beta_band {
            let beta = band.portfolio_beta(weights);
            if beta < band.lower - FEASIBILITY_TOL || beta > band.upper + FEASIBILITY_TOL {
                out.push(format!(
                    "portfolio beta {beta} outside [{}, {}]",
                    band.lower, band.upper
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(symbol: &str, sector: Option<&str>) -> UniverseItem {
        UniverseItem {
            id: 1,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            sector: sector.map(String::from),
            price: dec!(10),
            liquidity_score: dec!(1000),
        }
    }

    fn four_name_universe() -> Vec<UniverseItem> {
        vec![
            item("AAA", Some("Tech")),
            item("BBB", Some("Tech")),
            item("CCC", Some("Energy")),
            item("DDD", None),
        ]
    }

    #[test]
    fn test_defaults_match_documented_policy() {
        let c = OptimizationConstraints::default();
        assert_eq!(c.max_weight_per_name, dec!(0.10));
        assert_eq!(c.max_sector_weight, dec!(0.30));
        assert_eq!(c.max_turnover, dec!(0.25));
        assert_eq!(c.risk_aversion, dec!(5));
        assert_eq!(c.cost_aversion, dec!(1));
        assert_eq!(c.cvar_confidence, dec!(0.95));
        assert!(c.long_only);
        assert!(c.target_beta.is_none());
    }

    #[test]
    fn test_partial_json_fills_remaining_defaults() {
        let c: OptimizationConstraints =
            serde_json::from_str(r#"{"max_turnover": "0.10", "long_only": false}"#).unwrap();
        assert_eq!(c.max_turnover, dec!(0.10));
        assert!(!c.long_only);
        assert_eq!(c.max_weight_per_name, dec!(0.10));
    }

    #[test]
    fn test_validation_accepts_defaults_and_rejects_out_of_range() {
        assert!(OptimizationConstraints::default().validate().is_ok());

        let mut c = OptimizationConstraints::default();
        c.max_weight_per_name = Decimal::ZERO;
        assert!(matches!(
            c.validate(),
            Err(PortfolioError::InvalidInput { field, .. }) if field == "max_weight_per_name"
        ));

        let mut c = OptimizationConstraints::default();
        c.max_sector_weight = dec!(1.5);
        assert!(matches!(
            c.validate(),
            Err(PortfolioError::InvalidInput { field, .. }) if field == "max_sector_weight"
        ));

        let mut c = OptimizationConstraints::default();
        c.max_turnover = dec!(1.5);
        assert!(c.validate().is_err());

        let mut c = OptimizationConstraints::default();
        c.cvar_confidence = dec!(1);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_inconsistent_caps_still_validate() {
        // Sector cap below the name cap shrinks the feasible set but is
        // accepted; affected names simply cannot reach their own cap.
        let mut c = OptimizationConstraints::default();
        c.max_weight_per_name = dec!(0.40);
        c.max_sector_weight = dec!(0.20);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_sectors_group_with_unknown_bucket() {
        let set = ConstraintSet::build(
            &four_name_universe(),
            &OptimizationConstraints::default(),
            None,
        )
        .unwrap();
        assert_eq!(set.sector_groups.len(), 3);
        assert_eq!(set.sector_groups["Tech"], vec![0, 1]);
        assert_eq!(set.sector_groups["Energy"], vec![2]);
        assert_eq!(set.sector_groups["Unknown"], vec![3]);
    }

    #[test]
    fn test_wide_sector_cap_is_disabled() {
        let mut constraints = OptimizationConstraints::default();
        constraints.max_sector_weight = dec!(1);
        let set = ConstraintSet::build(&four_name_universe(), &constraints, None).unwrap();
        assert!(set.sector_cap.is_none());
    }

    #[test]
    fn test_beta_band_floors_lower_at_zero() {
        let mut constraints = OptimizationConstraints::default();
        constraints.target_beta = Some(dec!(0.02));
        let betas = vec![dec!(1); 4];
        let set = ConstraintSet::build(&four_name_universe(), &constraints, Some(betas)).unwrap();
        let band = set.beta_band.expect("band should be present");
        assert_eq!(band.lower, Decimal::ZERO);
        assert_eq!(band.upper, dec!(0.07));
    }

    #[test]
    fn test_mismatched_beta_vector_drops_the_band() {
        let mut constraints = OptimizationConstraints::default();
        constraints.target_beta = Some(dec!(1));
        let set = ConstraintSet::build(
            &four_name_universe(),
            &constraints,
            Some(vec![dec!(1), dec!(1)]),
        )
        .unwrap();
        assert!(set.beta_band.is_none());
    }

    #[test]
    fn test_short_floor_applies_when_not_long_only() {
        let mut constraints = OptimizationConstraints::default();
        constraints.long_only = false;
        let set = ConstraintSet::build(&four_name_universe(), &constraints, None).unwrap();
        assert_eq!(set.lower_bound, dec!(-0.10));
    }

    #[test]
    fn test_empty_universe_is_insufficient() {
        let err = ConstraintSet::build(&[], &OptimizationConstraints::default(), None)
            .expect_err("empty universe must be rejected");
        assert!(matches!(
            err,
            PortfolioError::InsufficientUniverse {
                required: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_violations_flag_each_broken_constraint() {
        let mut constraints = OptimizationConstraints::default();
        constraints.max_weight_per_name = dec!(0.50);
        constraints.max_sector_weight = dec!(0.60);
        constraints.max_turnover = dec!(0.50);
        let set = ConstraintSet::build(&four_name_universe(), &constraints, None).unwrap();

        // Tech holds 0.90 (> 0.60), AAA holds 0.55 (> 0.50), budget is met,
        // and turnover from a cold book is 1.0 (> 0.50).
        let weights = [dec!(0.55), dec!(0.35), dec!(0.10), dec!(0)];
        let previous = [Decimal::ZERO; 4];
        let violations = set.violations(&weights, &previous);
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("above name cap")));
        assert!(violations.iter().any(|v| v.contains("sector Tech")));
        assert!(violations.iter().any(|v| v.contains("turnover")));
    }

    #[test]
    fn test_feasible_book_has_no_violations() {
        let set = ConstraintSet::build(
            &four_name_universe(),
            &OptimizationConstraints::default(),
            None,
        )
        .unwrap();
        let weights = [dec!(0.10), dec!(0.10), dec!(0.10), dec!(0.10)];
        // Only 0.40 allocated: budget violation is expected, nothing else.
        let violations = set.violations(&weights, &weights);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("budget"));
    }
}
