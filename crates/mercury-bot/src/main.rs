//! Mercury binary-market arbitrage bot - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Mercury binary-market arbitrage bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MERCURY_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    mercury_telemetry::init_logging()?;

    info!("starting mercury v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("MERCURY_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "loading configuration");
    let config = mercury_bot::AppConfig::from_file(&config_path)?;
    info!(
        dry_run = config.mercury.dry_run,
        markets = config.strategies.gabagool.markets.len(),
        "configuration loaded"
    );

    let mut app = mercury_bot::Application::new(config)?;
    app.set_config_path(config_path);
    let report = app.run().await?;

    info!(
        duration_seconds = report.duration_seconds().unwrap_or(0.0),
        errors = report.errors.len(),
        "mercury stopped"
    );
    Ok(())
}
