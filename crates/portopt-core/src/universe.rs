use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Rate;

/// Annualized expected return assumed for names the scoring service
/// did not cover.
pub const BASELINE_EXPECTED_RETURN: Rate = dec!(0.08);

/// One investable name in the point-in-time universe snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseItem {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    pub price: Decimal,
    /// Liquidity proxy derived from ADV/turnover. Higher is more liquid.
    pub liquidity_score: Decimal,
}

impl UniverseItem {
    /// Sector label used for grouping; unclassified names share one bucket.
    pub fn sector_label(&self) -> &str {
        self.sector.as_deref().unwrap_or("Unknown")
    }
}

/// Investor profile forwarded to the scoring service. Absence of a
/// profile is a hard error for the recommendation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorProfile {
    pub age: u32,
    pub income_bracket: String,
    pub investment_goals: String,
    pub risk_tolerance: String,
    pub investment_horizon: String,
}

/// Per-symbol output of the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockScore {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Rate>,
}

/// Drops names whose liquidity proxy falls below the floor.
pub fn apply_liquidity_floor(items: Vec<UniverseItem>, min_liquidity: Decimal) -> Vec<UniverseItem> {
    items
        .into_iter()
        .filter(|item| item.liquidity_score >= min_liquidity)
        .collect()
}

/// Aligns scoring output to the universe ordering. Names without a score
/// (or with a score row missing the estimate) get the annualized baseline.
pub fn align_expected_returns(universe: &[UniverseItem], scores: &[StockScore]) -> Vec<Rate> {
    universe
        .iter()
        .map(|item| {
            scores
                .iter()
                .find(|s| s.symbol == item.symbol)
                .and_then(|s| s.expected_return)
                .unwrap_or(BASELINE_EXPECTED_RETURN)
        })
        .collect()
}
