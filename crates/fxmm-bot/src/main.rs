//! Dual-venue FX market-making bot - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Dual-venue FX market-making bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FXMM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    fxmm_bot::logging::init_logging();

    info!("Starting fxmm-bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("FXMM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = fxmm_bot::AppConfig::from_file(&config_path)?;
    info!(
        instruments = config.engine.instruments.len(),
        dry_run = config.engine.dry_run,
        "Configuration loaded"
    );

    let mut app = fxmm_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
