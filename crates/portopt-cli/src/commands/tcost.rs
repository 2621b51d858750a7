use std::collections::{BTreeMap, BTreeSet};

use clap::Args;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portopt_core::tcost::CostModel;
use portopt_core::universe::UniverseItem;

use crate::input;

/// Weight changes below this do not count as trades.
const TRADE_TOL: Decimal = dec!(0.000001);

/// Arguments for a transaction-cost estimate
#[derive(Args)]
pub struct TcostArgs {
    /// Path to a JSON file with target and previous weights
    #[arg(long)]
    pub input: Option<String>,
}

/// A rebalance to price. Cost coefficients come from the universe
/// snapshot when one is given, else from explicit spread/impact maps,
/// else from the model's defaults.
#[derive(Debug, Deserialize)]
struct TcostInput {
    target: BTreeMap<String, Decimal>,
    #[serde(default)]
    previous: BTreeMap<String, Decimal>,
    #[serde(default)]
    universe: Vec<UniverseItem>,
    #[serde(default)]
    cost_model: CostModel,
}

#[derive(Debug, Serialize)]
struct TcostOutput {
    cost_estimate: Decimal,
    turnover: Decimal,
    traded_symbols: usize,
}

pub fn run_tcost(args: TcostArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let case: TcostInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input <file.json> or stdin required for tcost".into());
    };

    let model = if case.universe.is_empty() {
        case.cost_model
    } else {
        CostModel::from_universe(&case.universe)
    };

    let symbols: BTreeSet<&String> = case.target.keys().chain(case.previous.keys()).collect();
    let mut turnover = Decimal::ZERO;
    let mut traded = 0usize;
    for symbol in symbols {
        let target = case.target.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let previous = case.previous.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let delta = (target - previous).abs();
        turnover += delta;
        if delta > TRADE_TOL {
            traded += 1;
        }
    }

    let output = TcostOutput {
        cost_estimate: model.estimate(&case.target, &case.previous),
        turnover,
        traded_symbols: traded,
    };
    Ok(serde_json::to_value(output)?)
}
