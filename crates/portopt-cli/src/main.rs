mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::audit::AuditArgs;
use commands::optimize::OptimizeArgs;
use commands::risk::RiskArgs;
use commands::tcost::TcostArgs;

/// Constrained, cost-aware portfolio construction
#[derive(Parser)]
#[command(
    name = "popt",
    version,
    about = "Constrained, cost-aware portfolio construction",
    long_about = "A CLI for constrained mean-variance portfolio construction with \
                  decimal precision. Runs the full recommendation pipeline from a \
                  JSON request file, plus standalone risk-metric, transaction-cost \
                  and audit-key utilities."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full recommendation pipeline from a JSON request file
    Optimize(OptimizeArgs),
    /// Risk metrics (volatility, VaR, CVaR) for a given weight map
    Risk(RiskArgs),
    /// Transaction-cost estimate for a rebalance
    Tcost(TcostArgs),
    /// Print the idempotency key a request resolves to
    AuditKey(AuditArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Risk(args) => commands::risk::run_risk(args),
        Commands::Tcost(args) => commands::tcost::run_tcost(args),
        Commands::AuditKey(args) => commands::audit::run_audit_key(args),
        Commands::Version => {
            println!("popt {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
