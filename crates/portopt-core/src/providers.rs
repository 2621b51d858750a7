//! Collaborator seams for the recommendation pipeline.
//!
//! The engine never talks to a database or scoring service directly; it
//! consumes these traits. Static in-memory implementations are provided
//! for tests and for driving the pipeline from serialized snapshots.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::PortfolioWeights;
use crate::universe::{apply_liquidity_floor, InvestorProfile, StockScore, UniverseItem};
use crate::PortfolioResult;

/// Point-in-time security universe with liquidity scores.
/// An empty result is a valid outcome, not an error.
pub trait UniverseProvider {
    fn fetch_universe(
        &self,
        symbols: Option<&[String]>,
        as_of: NaiveDate,
        min_liquidity: Decimal,
    ) -> PortfolioResult<Vec<UniverseItem>>;
}

/// Per-security expected-return estimates for an investor profile.
/// Entries may be missing or partial; alignment fills a baseline.
pub trait ScoringProvider {
    fn score(&self, universe: &[UniverseItem], profile: &InvestorProfile) -> Vec<StockScore>;
}

/// Factor risk data keyed to a symbol ordering. Every accessor may
/// return `None`; the pipeline degrades instead of failing.
pub trait RiskDataProvider {
    fn covariance(&self, symbols: &[String], as_of: NaiveDate) -> Option<Vec<Vec<Decimal>>>;
    fn volatility(&self, symbol: &str, as_of: NaiveDate) -> Option<Decimal>;
    fn beta_vector(&self, symbols: &[String], as_of: NaiveDate) -> Option<Vec<Decimal>>;
}

/// Current holdings of the account being rebalanced. A new account
/// returns an empty map (cold start).
pub trait PositionProvider {
    fn previous_weights(&self, account_id: i64) -> PortfolioWeights;
}

// ---------------------------------------------------------------------------
// Static implementations
// ---------------------------------------------------------------------------

/// Fixed universe snapshot. Honors the requested-symbol filter
/// (case-insensitive, as upstream tickers are uppercase) and the
/// liquidity floor, and preserves snapshot order otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticUniverse {
    pub items: Vec<UniverseItem>,
}

impl UniverseProvider for StaticUniverse {
    fn fetch_universe(
        &self,
        symbols: Option<&[String]>,
        _as_of: NaiveDate,
        min_liquidity: Decimal,
    ) -> PortfolioResult<Vec<UniverseItem>> {
        let requested: Option<Vec<String>> =
            symbols.map(|list| list.iter().map(|s| s.to_uppercase()).collect());
        let selected: Vec<UniverseItem> = self
            .items
            .iter()
            .filter(|item| match &requested {
                Some(wanted) => wanted.contains(&item.symbol.to_uppercase()),
                None => true,
            })
            .cloned()
            .collect();
        Ok(apply_liquidity_floor(selected, min_liquidity))
    }
}

/// Fixed expected-return scores, independent of the profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticScores {
    pub scores: Vec<StockScore>,
}

impl ScoringProvider for StaticScores {
    fn score(&self, _universe: &[UniverseItem], _profile: &InvestorProfile) -> Vec<StockScore> {
        self.scores.clone()
    }
}

/// Fixed risk data: an optional covariance matrix, per-symbol
/// volatilities, and an optional beta vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRiskData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<Vec<Vec<Decimal>>>,
    #[serde(default)]
    pub volatilities: BTreeMap<String, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub betas: Option<Vec<Decimal>>,
}

impl RiskDataProvider for StaticRiskData {
    fn covariance(&self, _symbols: &[String], _as_of: NaiveDate) -> Option<Vec<Vec<Decimal>>> {
        self.covariance.clone()
    }

    fn volatility(&self, symbol: &str, _as_of: NaiveDate) -> Option<Decimal> {
        self.volatilities.get(symbol).copied()
    }

    fn beta_vector(&self, _symbols: &[String], _as_of: NaiveDate) -> Option<Vec<Decimal>> {
        self.betas.clone()
    }
}

/// Fixed prior holdings shared by every account id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPositions {
    pub weights: PortfolioWeights,
}

impl PositionProvider for StaticPositions {
    fn previous_weights(&self, _account_id: i64) -> PortfolioWeights {
        self.weights.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(symbol: &str, liquidity: Decimal) -> UniverseItem {
        UniverseItem {
            id: 1,
            symbol: symbol.to_string(),
            name: format!("{symbol} Corp"),
            sector: Some("Tech".to_string()),
            price: dec!(100),
            liquidity_score: liquidity,
        }
    }

    #[test]
    fn test_static_universe_filters_symbols_and_liquidity() {
        let provider = StaticUniverse {
            items: vec![
                item("AAA", dec!(5000)),
                item("BBB", dec!(10)),
                item("CCC", dec!(5000)),
            ],
        };
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        let wanted = vec!["aaa".to_string(), "BBB".to_string()];
        let fetched = provider
            .fetch_universe(Some(&wanted), as_of, dec!(100))
            .unwrap();
        let symbols: Vec<&str> = fetched.iter().map(|u| u.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA"]);

        let unrestricted = provider.fetch_universe(None, as_of, Decimal::ZERO).unwrap();
        assert_eq!(unrestricted.len(), 3);
    }

    #[test]
    fn test_static_risk_data_looks_up_per_symbol_volatility() {
        let mut vols = BTreeMap::new();
        vols.insert("AAA".to_string(), dec!(0.3));
        let provider = StaticRiskData {
            covariance: None,
            volatilities: vols,
            betas: None,
        };
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(provider.volatility("AAA", as_of), Some(dec!(0.3)));
        assert_eq!(provider.volatility("ZZZ", as_of), None);
    }
}
