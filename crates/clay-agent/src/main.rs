//! clay-agent binary entry point.

use anyhow::Result;
use clap::Parser;
use clay_agent::capture::NullCaptureProvider;
use clay_agent::commands::CommandHandler;
use clay_agent::config::AgentConfig;
use clay_agent::connection::{self, AgentRuntime};
use clay_agent::executor::CommandExecutor;
use clay_agent::heartbeat::Heartbeat;
use clay_agent::monitor::ScreenMonitor;
use clay_agent::system::SysinfoCpuProbe;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Parser, Debug)]
#[command(name = "clay-agent", about = "Clay remote agent daemon", version)]
struct Args {
    /// Path to the config file (default: ~/.config/clay/agent.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub WebSocket URL, overrides the config file
    #[arg(short, long)]
    server: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_path(path),
        None => AgentConfig::load(),
    };
    if let Some(server) = args.server {
        config.server_url = server;
    }

    info!("Starting clay-agent, hub at {}", config.server_url);

    let (outbox_tx, outbox_rx) = mpsc::channel(clay_agent::OUTBOX_BUFFER_SIZE);
    let (shutdown_tx, _) = broadcast::channel(1);
    let connected = Arc::new(AtomicBool::new(false));

    let executor = Arc::new(CommandExecutor::new(
        outbox_tx.clone(),
        config.max_concurrent_commands,
        config.command_timeout,
    ));
    let monitor = Arc::new(ScreenMonitor::new(
        outbox_tx.clone(),
        Arc::new(NullCaptureProvider),
        Arc::new(SysinfoCpuProbe::new()),
        config.screenshot_interval,
        config.screenshot_quality,
        config.screenshot_scale,
    ));
    let handler = Arc::new(CommandHandler::new(
        outbox_tx.clone(),
        Arc::clone(&executor),
        Arc::clone(&monitor),
        Arc::clone(&connected),
        &config,
    ));

    let heartbeat = Heartbeat::new(
        outbox_tx.clone(),
        Arc::clone(&connected),
        config.heartbeat_interval,
        config.reconnect_delay,
    )
    .spawn(shutdown_tx.subscribe());

    let runtime = AgentRuntime {
        connected: Arc::clone(&connected),
        executor: Arc::clone(&executor),
        monitor: Arc::clone(&monitor),
        handler,
    };
    let connection = tokio::spawn(connection::run(
        config,
        runtime,
        outbox_rx,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    if monitor.is_running() {
        let _ = monitor.stop().await;
    }
    drop(outbox_tx);

    let _ = tokio::time::timeout(Duration::from_secs(5), connection).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), heartbeat).await;
    info!("clay-agent stopped");
    Ok(())
}
