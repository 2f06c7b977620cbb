use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use common::batch::Batch;
use common::config::{load_config, SuiteConfig};
use common::error::CResult;
use common::log::{init_logging, LoggingOptions, OutputType};
use common::processor::CancellationToken;
use pipeline::{HostImpl, ProcessorChain};

use cli::cli_options::{CliOptions, Format};
use cli::fixtures;

#[derive(Parser, Serialize, Debug, Clone)]
#[command(name = "db-intel-cli")]
#[command(version = "0.1.0")]
#[command(author = "rust-us")]
#[command(about = "Database Intelligence Processor Suite harness")]
#[command(long_about = None)]
struct CliArgs {
    /// Path to a TOML config file; defaults are used for anything this doesn't set.
    #[arg(short, long, help = "Path to loaded configuration file", value_name = "FILE")]
    config: Option<PathBuf>,

    /// enable debug logging
    #[arg(short, long, help = "enable debug mode", default_value_t = false)]
    debug: bool,

    #[arg(short, long, help = "output format: [yaml | json], default yaml", default_value = "yaml")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Serialize, Debug, Clone)]
enum Commands {
    /// Runs a batch -- either a named scenario fixture or a JSON file -- through the full chain.
    Replay {
        /// A fixture name (fingerprint-passthrough, plan-regression, sampling-budget,
        /// circuit-trip, pii-redaction, cost-emergency) or a path to a JSON-encoded batch.
        file: String,
    },
}

#[tokio::main]
async fn main() -> CResult<()> {
    let args = CliArgs::parse();
    let format = Format::parse(&args.format);
    let options = CliOptions::new(args.debug, format);

    let log_opts = LoggingOptions::new(args.debug, OutputType::Stdout, None);
    let _guard = init_logging(log_opts);

    eprintln!("args:\n{}", options.format().to_string_pretty(&args));

    let suite_config = match &args.config {
        Some(path) => load_config(path)?,
        None => SuiteConfig::default(),
    };
    if options.is_debug() {
        eprintln!("loaded config:\n{}", options.format().to_string_pretty(&suite_config));
        eprintln!(
            "cost control budget: {} per {} window",
            cli::pretty::to_bytes_len_pretty(suite_config.cost_control.monthly_budget_bytes),
            cli::pretty::to_duration_pretty(&Duration::from_secs(suite_config.cost_control.window_secs)),
        );
    }

    let chain = ProcessorChain::new(suite_config)?;
    let host = HostImpl::new();
    chain.start_all(&host).await?;

    let Commands::Replay { file } = args.command;
    let mut batch = load_batch(&chain, &file)?;

    let ctx = CancellationToken::new();
    chain.run_batch(&ctx, &mut batch, &host).await?;

    eprintln!();
    eprintln!("╔╦╗╔╗  ╦  ╔╗╔╔╦╗╔═╗╦  ");
    eprintln!(" ║║╠╩╗ ║  ║║║ ║ ║╣ ║  ");
    eprintln!("═╩╝╚═╝ ╩  ╝╚╝ ╩ ╚═╝╩═╝ surviving items: {}", batch.item_count());
    eprintln!();

    println!("{}", options.format().to_string_pretty(&batch));

    eprintln!("self-metrics:");
    let mut metrics: Vec<(String, f64)> = host.metrics().snapshot().into_iter().collect();
    metrics.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in metrics {
        eprintln!("  {name} = {value}");
    }

    Ok(())
}

/// Loads a replay batch either from the fixed scenario set or from a JSON
/// file on disk. `circuit-trip` additionally drives the breaker open first,
/// since that scenario only makes sense after `failure_threshold` consecutive
/// reported failures.
fn load_batch(chain: &ProcessorChain, file: &str) -> CResult<Batch> {
    if file == "circuit-trip" {
        for _ in 0..5 {
            chain.circuit_breaker().report_outcome("flaky-db", false);
        }
    }

    if let Some(batch) = fixtures::named(file) {
        return Ok(batch);
    }

    let text = fs::read_to_string(file).map_err(|e| common::error::CoreError::Config(format!("reading {file:?}: {e}")))?;
    serde_json::from_str(&text).map_err(|e| common::error::CoreError::Config(format!("parsing {file:?}: {e}")))
}
