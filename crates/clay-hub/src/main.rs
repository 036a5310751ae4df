//! clay-hub - Real-time relay hub for Clay agents and observer consoles.

use anyhow::{Context, Result};
use clap::Parser;
use clay_hub::config::HubConfig;
use clay_hub::hub::RelayHub;
use clay_hub::{routes, sweeper};
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "clay-hub", about = "Real-time relay hub for Clay agents")]
struct Args {
    /// Path to config file.
    /// Defaults to ~/.config/clay/hub.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config).
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = match args.config {
        Some(path) => HubConfig::load_from_path(&path),
        None => HubConfig::load(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    info!(
        "Starting clay-hub (listen={}, base_timeout={:?}, media_multiplier={}, sweep={:?})",
        config.listen_addr,
        config.timeouts.base_timeout,
        config.timeouts.media_multiplier,
        config.timeouts.check_interval
    );

    let hub = Arc::new(RelayHub::new(config.timeouts));

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper_handle = sweeper::spawn(Arc::clone(&hub), shutdown_tx.subscribe());

    let app = routes::router(Arc::clone(&hub));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    info!("Relay listening on {}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
    .context("relay server failed")?;

    let _ = shutdown_tx.send(());
    let _ = sweeper_handle.await;

    info!("clay-hub stopped");
    Ok(())
}
