//! Rustrisk Server - Headless risk engine
//!
//! Runs the risk and position-sizing engine without any inbound surface.
//! Reports and alerts are pushed as structured JSON logs to stdout.
//!
//! # Usage
//! ```sh
//! VAR_METHOD=historical cargo run --bin server -- --limits config/limits.toml
//! ```
//!
//! # Environment Variables
//! - `VAR_METHOD` - historical | parametric | monte_carlo (default: historical)
//! - `EVALUATION_INTERVAL_MS` - limit evaluation cadence (default: 1000)
//! - `REPORT_INTERVAL_SECS` - report cadence (default: 60)

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use rustrisk::application::system::Application;
use rustrisk::config::{EngineConfig, load_limits};
use rustrisk::domain::portfolio::PortfolioSnapshot;
use rustrisk::infrastructure::alerts::TracingNotifier;
use rustrisk::infrastructure::mock::MockExecutionService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the risk limits TOML file
    #[arg(short, long)]
    limits: Option<PathBuf>,

    /// Initial account equity in USD when no snapshot feed is attached yet
    #[arg(long, default_value = "100000")]
    initial_equity: Decimal,

    /// Dry-run mode: execution requests are recorded, never sent
    #[arg(long, default_value_t = true)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Rustrisk Server {} starting...", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let limits_path = cli
        .limits
        .unwrap_or_else(|| PathBuf::from(&config.limits_file_path));
    let limits = load_limits(&limits_path)?;
    info!(
        method = ?config.var_method,
        confidence = config.var_confidence,
        limits = %limits.name,
        "Configuration loaded"
    );

    // Execution stays mocked until a broker adapter is wired in; the engine
    // only ever asks for cancel-all and liquidation
    if !cli.dry_run {
        info!("Live execution adapters not configured; continuing in dry-run");
    }
    let execution = MockExecutionService::new();
    let notifier = Arc::new(TracingNotifier);

    let initial = PortfolioSnapshot::all_cash(Utc::now(), cli.initial_equity);
    let mut app = Application::build(config, limits, initial, execution, notifier)?;

    app.start();
    info!("Risk engine running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    app.shutdown();
    Ok(())
}
