//! Live timing recorder
//!
//! `livetiming save <file> <topics>...` records the live feed;
//! `livetiming extract <input> <output>` turns a debug recording back
//! into feed messages.

use anyhow::{bail, Context, Result};
use clap::Parser;
use livetiming::{
    extract_file, init_tracing, ClientError, ClientOutcome, EnvToken, LiveTimingClient,
    ProtocolKind, RecorderConfig,
};
use livetiming_recorder::bin_common::{Cli, Command, SaveArgs};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Save(args) => save(args).await,
        Command::Extract { input, output } => extract(&input, &output),
    }
}

async fn save(args: SaveArgs) -> Result<()> {
    let config = args.load_config().context("Failed to load configuration")?;
    let timeout = config.timeout;

    let outcome = if config.protocol == ProtocolKind::Core {
        info!("Attempting to connect with authentication...");
        let client = LiveTimingClient::new(config.clone(), Some(Arc::new(EnvToken::default())));
        match record(&client).await {
            Err(ClientError::Authentication(message)) => {
                error!("Authentication failed: {}", message);
                info!("Falling back to the unauthenticated legacy client...");
                // The fallback always targets the public legacy endpoint
                let fallback = RecorderConfig {
                    protocol: ProtocolKind::Legacy,
                    url: None,
                    negotiate_url: None,
                    ..config
                };
                record(&LiveTimingClient::new(fallback, None)).await?
            }
            other => other?,
        }
    } else {
        record(&LiveTimingClient::new(config, None)).await?
    };

    if outcome.is_startup_timeout() {
        bail!("No data received within {}s of connecting", timeout);
    }
    Ok(())
}

/// Run one client with its own Ctrl+C handler, detached when the run ends
async fn record(client: &LiveTimingClient) -> std::result::Result<ClientOutcome, ClientError> {
    let signals = client.stop_handle().spawn_signal_handler();
    let result = client.start().await;
    signals.abort();
    result
}

fn extract(input: &Path, output: &Path) -> Result<()> {
    let summary = extract_file(input, output)
        .with_context(|| format!("Failed to extract {}", input.display()))?;
    println!("Completed with {} error(s)", summary.errors);
    Ok(())
}
