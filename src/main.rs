use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use candela::voice::capture::CaptureMode;
use candela::{Config, Daemon};

/// candela - voice control for Philips Hue lighting
#[derive(Parser)]
#[command(name = "candela", version, about)]
struct Cli {
    /// Capture continuously instead of waiting for the wake word
    #[arg(long)]
    fallback: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Bridge IP or hostname
    #[arg(long, env = "HUE_BRIDGE_IP")]
    bridge: Option<String>,

    /// Wake detection sensitivity (0.0 to 1.0)
    #[arg(long, env = "WAKE_WORD_SENSITIVITY", default_value = "0.5")]
    sensitivity: f32,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mode = if cli.fallback {
        tracing::info!("wake word disabled, capturing continuously");
        CaptureMode::Continuous
    } else {
        CaptureMode::Gated
    };

    let config = Config::new(cli.bridge, cli.sensitivity);
    let daemon = Daemon::new(config, mode);
    daemon.run().await?;
    Ok(())
}
