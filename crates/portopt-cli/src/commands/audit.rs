use clap::Args;
use serde::Serialize;
use serde_json::Value;

use portopt_core::audit;
use portopt_core::recommend::RecommendationRequest;

use crate::input;

/// Arguments for resolving a request's idempotency key
#[derive(Args)]
pub struct AuditArgs {
    /// Path to a JSON file holding a recommendation request
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuditKeyOutput {
    idempotency_key: String,
    /// True when the key was derived from the request rather than
    /// supplied by the caller.
    derived: bool,
}

pub fn run_audit_key(args: AuditArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: RecommendationRequest = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input <file.json> or stdin required for audit-key".into());
    };

    let output = match request.idempotency_key {
        Some(key) => AuditKeyOutput {
            idempotency_key: key,
            derived: false,
        },
        None => AuditKeyOutput {
            idempotency_key: audit::request_key(
                request.account_id,
                &request.model_version,
                &request.feature_view_version,
                request.symbols.as_deref(),
                request.as_of,
                &request.constraints,
            ),
            derived: true,
        },
    };
    Ok(serde_json::to_value(output)?)
}
