//! Parametric portfolio risk metrics derived from solved weights and the
//! risk model. Loss magnitudes are reported as positive numbers.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::risk_model::RiskModel;
use crate::types::{PortfolioWeights, Rate};

/// Floor applied under the portfolio variance before the square root.
const VARIANCE_EPSILON: Decimal = dec!(0.000000000001);

/// Confidence substituted when the configured level is degenerate.
const DEFAULT_CONFIDENCE: Decimal = dec!(0.95);

/// Tail probability paired with [`DEFAULT_CONFIDENCE`].
const DEFAULT_TAIL: Decimal = dec!(0.05);

/// Levels this close to 0 or 1 are clamped before the quantile.
const QUANTILE_FLOOR: Decimal = dec!(0.0000000001);

/// Portfolio-level risk summary for a solved allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Annualised portfolio volatility, `sqrt(wᵀΣw)`.
    pub volatility: Rate,
    /// Weighted expected return, `Σ w·μ`.
    pub expected_return: Rate,
    /// Parametric Value-at-Risk at the configured confidence.
    pub var: Decimal,
    /// Parametric Conditional Value-at-Risk (expected shortfall).
    pub cvar: Decimal,
    /// Round-trip trading cost estimate for reaching these weights.
    pub transaction_cost_estimate: Decimal,
    /// Portfolio beta; populated only when a beta vector was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<Decimal>,
    /// Tracking error versus a benchmark; requires external benchmark data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_error: Option<Decimal>,
}

impl RiskMetrics {
    /// Human-readable one-line summary in the persisted report format.
    pub fn summary(&self) -> String {
        format!(
            "Vol={:.4} | VaR95={:.4} | CVaR95={:.4} | TCost≈{:.4}",
            self.volatility, self.var, self.cvar, self.transaction_cost_estimate
        )
    }
}

/// Compute volatility, expected return and parametric VaR/CVaR for the
/// final weights. Degenerate inputs (empty or all-zero weight map) yield
/// exact zeros rather than an error, so callers can report a flat book.
pub fn compute_risk_metrics(
    weights: &PortfolioWeights,
    symbols: &[String],
    expected_returns: &[Decimal],
    risk_model: &RiskModel,
    transaction_cost_estimate: Decimal,
    confidence: Decimal,
) -> RiskMetrics {
    let aligned: Vec<Decimal> = symbols
        .iter()
        .map(|s| weights.get(s).copied().unwrap_or(Decimal::ZERO))
        .collect();
    let total: Decimal = aligned.iter().sum();

    if weights.is_empty() || total == Decimal::ZERO {
        return RiskMetrics {
            volatility: Decimal::ZERO,
            expected_return: Decimal::ZERO,
            var: Decimal::ZERO,
            cvar: Decimal::ZERO,
            transaction_cost_estimate,
            beta: None,
            tracking_error: None,
        };
    }

    let variance = risk_model.portfolio_variance(&aligned);
    let volatility = sqrt_decimal(variance.max(VARIANCE_EPSILON));

    let expected_return: Decimal = aligned
        .iter()
        .zip(expected_returns.iter())
        .map(|(w, mu)| w * mu)
        .sum();

    let (var, cvar) = parametric_var_cvar(expected_return, volatility, confidence);

    RiskMetrics {
        volatility,
        expected_return,
        var,
        cvar,
        transaction_cost_estimate,
        beta: None,
        tracking_error: None,
    }
}

/// Normal-approximation VaR and CVaR as positive loss magnitudes:
/// `VaR = max(0, -(μ - zσ))`, `CVaR = max(0, -(μ - σ·φ(z)/(1-α)))`
/// with `φ` the standard-normal density evaluated in closed form.
pub fn parametric_var_cvar(mu: Decimal, sigma: Decimal, confidence: Decimal) -> (Decimal, Decimal) {
    // A degenerate confidence takes the 95% defaults as a pair; a substituted
    // z over the configured tail would let the CVaR multiplier cross z.
    let (z, tail) = if confidence <= Decimal::ZERO || confidence >= Decimal::ONE {
        (z_score_for_confidence(DEFAULT_CONFIDENCE), DEFAULT_TAIL)
    } else {
        (z_score_for_confidence(confidence), Decimal::ONE - confidence)
    };
    let phi = (-z * z / dec!(2)).exp() / sqrt_decimal(dec!(2) * Decimal::PI);

    let var = (-(mu - z * sigma)).max(Decimal::ZERO);
    let cvar = (-(mu - sigma * (phi / tail))).max(Decimal::ZERO);
    (var, cvar)
}

/// Coarse risk bucket used on persisted recommendations.
pub fn risk_bucket(volatility: Decimal) -> &'static str {
    if volatility < dec!(0.15) {
        "Low"
    } else if volatility < dec!(0.30) {
        "Medium"
    } else {
        "High"
    }
}

/// z-score for a confidence level. Canonical levels use the standard
/// table; everything else goes through the rational quantile so the z and
/// the `1 - confidence` tail describe the same point of the distribution.
fn z_score_for_confidence(confidence: Decimal) -> Decimal {
    if confidence == dec!(0.90) {
        return dec!(1.282);
    }
    if confidence == dec!(0.95) {
        return dec!(1.645);
    }
    if confidence == dec!(0.975) {
        return dec!(1.960);
    }
    if confidence == dec!(0.99) {
        return dec!(2.326);
    }
    if confidence == dec!(0.995) {
        return dec!(2.576);
    }
    normal_quantile(confidence)
}

/// Standard-normal quantile via the Abramowitz & Stegun 26.2.23 rational
/// approximation (absolute error below 4.5e-4), evaluated on the upper
/// tail and mirrored for levels under one half.
fn normal_quantile(p: Decimal) -> Decimal {
    let p = p.clamp(QUANTILE_FLOOR, Decimal::ONE - QUANTILE_FLOOR);
    let (tail, sign) = if p < dec!(0.5) {
        (p, -Decimal::ONE)
    } else {
        (Decimal::ONE - p, Decimal::ONE)
    };

    let t = sqrt_decimal(dec!(-2) * ln_decimal(tail));
    let numerator = dec!(2.515517) + t * (dec!(0.802853) + t * dec!(0.010328));
    let denominator =
        Decimal::ONE + t * (dec!(1.432788) + t * (dec!(0.189269) + t * dec!(0.001308)));
    sign * (t - numerator / denominator)
}

fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

fn ln_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.ln()
}
