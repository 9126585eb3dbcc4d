//! Log setup for the daemon.
//!
//! Console output plus, when `log.dir` is configured, a daily-rolling
//! diagnostic file and a separate transfer journal holding one line per
//! delivered file. The level filter sits behind a reload handle so a
//! configuration reload can change it without restarting. The journal is
//! not subject to the level filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use engine::{Config, LogConfig, ReloadHook, TRANSFER_LOG_TARGET};
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    filter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const LOG_FILE_NAME: &str = "tosser.log";
const JOURNAL_FILE_NAME: &str = "transfers.log";

/// Build the level filter.
///
/// `--verbose` wins, then `RUST_LOG`, then the configured level.
pub fn filter_for(level: &str, verbose: bool, env: Option<&str>) -> Result<EnvFilter, String> {
    let directives = if verbose {
        "debug"
    } else if let Some(env) = env.filter(|e| !e.trim().is_empty()) {
        env
    } else {
        level
    };
    EnvFilter::try_new(directives).map_err(|e| format!("invalid log level '{}': {}", directives, e))
}

fn env_directives() -> Option<String> {
    std::env::var(EnvFilter::DEFAULT_ENV).ok()
}

/// Applies level changes on configuration reload.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    verbose: bool,
    dir: Option<PathBuf>,
}

impl LogHandle {
    pub fn new(filter: reload::Handle<EnvFilter, Registry>, verbose: bool, dir: Option<PathBuf>) -> Self {
        LogHandle {
            filter,
            verbose,
            dir,
        }
    }
}

impl ReloadHook for LogHandle {
    fn on_reload(&self, config: &Config) -> Result<(), String> {
        let filter = filter_for(&config.log.level, self.verbose, env_directives().as_deref())?;
        self.filter
            .reload(filter)
            .map_err(|e| format!("cannot apply log level: {}", e))?;
        if config.log.dir != self.dir {
            warn!("log.dir changed; the new directory applies after restart");
        }
        info!(level = %config.log.level, "Log level applied");
        Ok(())
    }
}

/// Layer writing transfer events, and only those, to `writer`.
pub fn journal_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(filter::filter_fn(|meta| meta.target() == TRANSFER_LOG_TARGET))
}

/// Install the global subscriber.
///
/// The returned guards flush the log files when dropped and must be held
/// until the process exits.
pub fn init(log: &LogConfig, verbose: bool) -> Result<(LogHandle, Vec<WorkerGuard>)> {
    let filter = filter_for(&log.level, verbose, env_directives().as_deref())
        .map_err(anyhow::Error::msg)?;
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let mut guards = Vec::new();
    let (file_layer, journal) = match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            guards.push(file_guard);

            let journal_appender = tracing_appender::rolling::daily(dir, JOURNAL_FILE_NAME);
            let (journal_writer, journal_guard) = tracing_appender::non_blocking(journal_appender);
            guards.push(journal_guard);

            (
                Some(fmt::layer().with_writer(file_writer).with_ansi(false)),
                Some(journal_layer(journal_writer)),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .and_then(file_layer)
                .with_filter(filter_layer),
        )
        .with(journal)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok((LogHandle::new(filter_handle, verbose, log.dir.clone()), guards))
}
