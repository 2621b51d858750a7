use clap::Args;
use serde::Deserialize;
use serde_json::Value;

use portopt_core::providers::{StaticPositions, StaticRiskData, StaticScores, StaticUniverse};
use portopt_core::recommend::{recommend_portfolio, RecommendationRequest};

use crate::input;

/// Arguments for the full recommendation pipeline
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to a JSON file holding the request and market snapshot
    #[arg(long)]
    pub input: Option<String>,
}

/// One self-contained optimization case: the request plus the market
/// snapshot the usual service collaborators would supply.
#[derive(Debug, Deserialize)]
struct OptimizeInput {
    #[serde(default)]
    universe: StaticUniverse,
    #[serde(default)]
    scores: StaticScores,
    #[serde(default)]
    risk_data: StaticRiskData,
    #[serde(default)]
    positions: StaticPositions,
    request: RecommendationRequest,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let case: OptimizeInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input <file.json> or stdin required for optimize".into());
    };

    let output = recommend_portfolio(
        &case.universe,
        &case.scores,
        &case.risk_data,
        &case.positions,
        &case.request,
    )?;
    Ok(serde_json::to_value(output)?)
}
