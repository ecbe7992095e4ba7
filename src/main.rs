mod cli;
mod config;
mod ingest;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use partcast_media::{hls::PlaylistConfig, LivePlaylist, TimestampLedger};

use cli::Cli;
use config::Config;
use server::AppContext;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults off the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "partcast=trace,partcast_media=trace,tower_http=debug".to_string()
        } else {
            "partcast=debug,partcast_media=info,tower_http=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config = Config::load(&cli)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output dir {:?}", config.output_dir))?;

    let playlist = Arc::new(LivePlaylist::new(PlaylistConfig {
        window_size: config.window_size,
        target_duration: config.target_duration,
        part_target: config.part_duration,
        hold_back: config.hold_back(),
        part_hold_back: config.part_hold_back(),
        output_dir: config.output_dir.clone(),
    }));
    let ledger = Arc::new(TimestampLedger::new());

    tracing::info!(
        target_duration = config.target_duration,
        part_duration = config.part_duration,
        window = config.window_size,
        "starting LL-HLS repackager"
    );

    // The pipeline and the HTTP origin run independently: when the
    // encoder exits, the last published window keeps being served
    // until the process is told to stop.
    let ingest_playlist = playlist.clone();
    let ingest_ledger = ledger.clone();
    let ingest_config = config.clone();
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = ingest::run(ingest_config, ingest_playlist, ingest_ledger).await {
            tracing::error!(error = %e, "ingest pipeline failed");
        }
    });

    let ctx = AppContext { playlist, ledger };
    server::serve(ctx, &config.host, config.port, shutdown_signal()).await?;

    ingest_task.abort();
    let _ = ingest_task.await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
}
