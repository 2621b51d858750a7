use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::universe::UniverseItem;
use crate::types::Weight;

const SPREAD_FLOOR: Decimal = dec!(0.0002);
const SPREAD_CAP: Decimal = dec!(0.0020);
const IMPACT_FLOOR: Decimal = dec!(0.0005);
const IMPACT_CAP: Decimal = dec!(0.0040);

/// Half-spread assumed for symbols the model has no estimate for.
const DEFAULT_SPREAD: Decimal = dec!(0.0005);

/// Impact coefficient assumed for symbols the model has no estimate for.
const DEFAULT_IMPACT: Decimal = dec!(0.0015);

/// Transaction-cost model: linear spread cost plus square-root market
/// impact, both expressed as fractions of traded notional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostModel {
    pub spreads: BTreeMap<String, Decimal>,
    pub impacts: BTreeMap<String, Decimal>,
}

impl CostModel {
    /// Derives per-symbol proxies from the liquidity score:
    /// spread = clamp(1/liq, 2bp, 20bp), impact = clamp(5/liq, 5bp, 40bp).
    /// Illiquid names (score <= 0) take the upper clamps.
    pub fn from_universe(universe: &[UniverseItem]) -> Self {
        let mut spreads = BTreeMap::new();
        let mut impacts = BTreeMap::new();
        for item in universe {
            let liq = item.liquidity_score;
            let (spread, impact) = if liq <= Decimal::ZERO {
                (SPREAD_CAP, IMPACT_CAP)
            } else {
                (
                    (Decimal::ONE / liq).clamp(SPREAD_FLOOR, SPREAD_CAP),
                    (dec!(5) / liq).clamp(IMPACT_FLOOR, IMPACT_CAP),
                )
            };
            spreads.insert(item.symbol.clone(), spread);
            impacts.insert(item.symbol.clone(), impact);
        }
        CostModel { spreads, impacts }
    }

    /// Expected cost of moving from `previous` to `target`, summed over the
    /// union of both symbol sets so full exits are charged too:
    /// Σ |Δw|·spread + sqrt(|Δw|)·impact.
    pub fn estimate(
        &self,
        target: &BTreeMap<String, Weight>,
        previous: &BTreeMap<String, Weight>,
    ) -> Decimal {
        let symbols: BTreeSet<&String> = target.keys().chain(previous.keys()).collect();
        let mut total = Decimal::ZERO;
        for symbol in symbols {
            let delta = (value_or_zero(target, symbol) - value_or_zero(previous, symbol)).abs();
            total += delta * self.spread(symbol) + sqrt_decimal(delta) * self.impact(symbol);
        }
        total
    }

    pub fn spread(&self, symbol: &str) -> Decimal {
        self.spreads.get(symbol).copied().unwrap_or(DEFAULT_SPREAD)
    }

    pub fn impact(&self, symbol: &str) -> Decimal {
        self.impacts.get(symbol).copied().unwrap_or(DEFAULT_IMPACT)
    }

    /// Spread coefficients in universe order, for the solver objective.
    pub fn aligned_spreads(&self, symbols: &[String]) -> Vec<Decimal> {
        symbols.iter().map(|s| self.spread(s)).collect()
    }

    /// Impact coefficients in universe order, for the solver objective.
    pub fn aligned_impacts(&self, symbols: &[String]) -> Vec<Decimal> {
        symbols.iter().map(|s| self.impact(s)).collect()
    }
}

fn value_or_zero(map: &BTreeMap<String, Weight>, symbol: &str) -> Weight {
    map.get(symbol).copied().unwrap_or(Decimal::ZERO)
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}
