//! RC8 Daemon
//!
//! Reads one JSON command per stdin line, runs each on its own blocking
//! worker against the controller facade and writes one JSON response per
//! line to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use rc8d::{CommandDispatcher, CommandResponse, DaemonConfig, RC8Controller, SimulatedController};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rc8d")]
#[command(about = "DENSO RC8 Daemon - JSON command interface to a robot controller")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not connect on launch even if the config names a controller
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("DENSO RC8 Daemon");
    info!("{}", "=".repeat(50));

    let config = match &args.config {
        Some(path) => {
            info!("Using config: {}", path);
            DaemonConfig::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path))?
        }
        None => {
            info!("No config given, waiting for configure_connection");
            DaemonConfig::default()
        }
    };

    let transport = Arc::new(SimulatedController::new().without_call_log());
    info!("Transport: in-memory simulated RC8 controller (no hardware is contacted)");
    let controller = Arc::new(RC8Controller::from_config(transport, &config));

    if config.controller.is_some() && !args.no_autostart {
        let starter = Arc::clone(&controller);
        match tokio::task::spawn_blocking(move || starter.start())
            .await
            .context("Start-up worker panicked")?
        {
            Ok(()) => info!("Controller ready for commands"),
            Err(e) => error!("Controller start failed, send 'start' to retry: {}", e),
        }
    }

    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&controller)));
    run_command_loop(dispatcher).await?;

    info!("Performing graceful shutdown");
    tokio::task::spawn_blocking(move || controller.shutdown())
        .await
        .context("Failed during shutdown")?;

    info!("Shutdown complete");
    Ok(())
}

/// Dispatch stdin lines until EOF or a shutdown signal, then wait for
/// in-flight commands to finish
async fn run_command_loop(dispatcher: Arc<CommandDispatcher>) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<CommandResponse>();
    let writer = tokio::spawn(write_responses(rx));

    let mut reader = BufReader::new(io::stdin()).lines();
    let mut workers = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = reader.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        let dispatcher = Arc::clone(&dispatcher);
                        let tx = tx.clone();
                        workers.spawn_blocking(move || {
                            let response = dispatcher.handle_line(&line);
                            if tx.send(response).is_err() {
                                warn!("Response dropped: writer closed");
                            }
                        });
                    }
                    None => {
                        info!("End of input reached");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!("Command worker failed: {}", e);
        }
    }
    drop(tx);
    writer.await.context("Response writer failed")??;
    Ok(())
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<CommandResponse>) -> Result<()> {
    let mut stdout = io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response).context("Failed to encode response")?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await.context("Failed to write response")?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
