//! tosser - rule-driven file distribution daemon.
//!
//! Loads the configuration, starts the engine, optionally serves the status
//! page, and runs until SIGINT or SIGTERM. Statistics are saved on the way
//! out.

mod http;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use engine::{Config, ConfigLoader, Tosser};
use tokio::sync::oneshot;
use tracing::info;

/// tosser - Scan directories and route files by rules
#[derive(Parser, Debug)]
#[command(name = "tosser")]
#[command(version)]
#[command(about = "Move or copy files from watched directories according to ordered rules")]
struct Args {
    /// Configuration file
    #[arg(long, short, value_name = "PATH", default_value = "tosser.yaml")]
    config: PathBuf,

    /// Log at debug level regardless of configuration
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Read and validate the configuration.
fn load_config(args: &Args) -> Result<(ConfigLoader, Config)> {
    let mut loader = ConfigLoader::new(&args.config);
    let config = loader
        .load()
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;
    Ok((loader, config))
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<()> {
    let (loader, config) = load_config(args)?;
    let (log, _log_guards) = logging::init(&config.log, args.verbose)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_daemon(loader, config, Arc::new(log)))
}

async fn run_daemon(loader: ConfigLoader, config: Config, log: Arc<logging::LogHandle>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %loader.path().display(),
        "Starting tosser"
    );

    let enable_http = config.enable_http;
    let listen = config.listen.clone();

    let running = Tosser::new(config)
        .start(loader, log)
        .context("Failed to start engine")?;

    let (http_stop, http_stopped) = oneshot::channel::<()>();
    let server = if enable_http {
        let state = Arc::new(http::AppState::from_running(&running));
        Some(tokio::spawn(http::serve(listen, state, async move {
            let _ = http_stopped.await;
        })))
    } else {
        None
    };

    wait_for_signal().await?;

    let _ = http_stop.send(());
    if let Some(server) = server {
        let _ = server.await;
    }

    tokio::task::spawn_blocking(move || running.shutdown())
        .await
        .context("Shutdown task failed")?
        .context("Failed to save statistics")?;

    info!("tosser stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to set up Ctrl-C handler")?;
    info!("Received Ctrl-C");
    Ok(())
}
