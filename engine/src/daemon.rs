//! Daemon wiring.
//!
//! `Tosser` owns the state that outlives a configuration reload (statistics,
//! error history, in-flight cache). `Tosser::start` spawns the statistics
//! save task, the transfer workers and the scheduler, and hands back a
//! `RunningTosser` for status queries and shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Sender};
use tracing::{info, warn};

use crate::cache::ProcessingCache;
use crate::config::{Config, ConfigLoader, SharedConfig};
use crate::error::{EngineError, Result};
use crate::history::ErrorHistory;
use crate::pool::TransferPool;
use crate::router::Router;
use crate::scanner::Scanner;
use crate::scheduler::{ScanGate, Scheduler};
use crate::stats::{StatMessage, StatSaver, TosserStat};
use crate::status::{BuildInfo, StatusReport};

/// Re-initializes reload-sensitive subsystems (such as the log filter)
/// before a reloaded configuration is swapped in.
///
/// Returning an error rejects the reload; the previous configuration stays
/// active.
pub trait ReloadHook: Send + Sync {
    fn on_reload(&self, config: &Config) -> std::result::Result<(), String>;
}

impl<F> ReloadHook for F
where
    F: Fn(&Config) -> std::result::Result<(), String> + Send + Sync,
{
    fn on_reload(&self, config: &Config) -> std::result::Result<(), String> {
        self(config)
    }
}

pub struct Tosser {
    config: Config,
    stats: Arc<TosserStat>,
    history: Arc<ErrorHistory>,
    cache: Arc<ProcessingCache>,
}

impl Tosser {
    /// Prepare the daemon, restoring statistics from `config.stat_file`.
    ///
    /// An unreadable or corrupt snapshot is reported and the daemon starts
    /// with empty statistics.
    pub fn new(config: Config) -> Self {
        let history = Arc::new(ErrorHistory::new(config.error_history_size));
        let stats = match TosserStat::load(&config.stat_file) {
            Ok(stats) => stats,
            Err(e) => {
                history.report(format!("Failed to load statistics, starting empty: {}", e));
                TosserStat::new()
            }
        };
        Tosser {
            config,
            stats: Arc::new(stats),
            history,
            cache: Arc::new(ProcessingCache::new()),
        }
    }

    pub fn stats(&self) -> &Arc<TosserStat> {
        &self.stats
    }

    pub fn history(&self) -> &Arc<ErrorHistory> {
        &self.history
    }

    /// Spawn the pipeline. The first scan pass starts immediately.
    pub fn start(self, loader: ConfigLoader, hook: Arc<dyn ReloadHook>) -> Result<RunningTosser> {
        let started = Local::now();
        let shared = Arc::new(SharedConfig::new(self.config));
        let config = shared.current();

        let (stats_tx, saver) = StatSaver::spawn(
            Arc::clone(&self.stats),
            config.stat_file.clone(),
            config.stat_save_interval,
            config.queue_capacity,
            Arc::clone(&self.history),
        )?;

        let (queue_tx, queue_rx) = bounded(config.queue_capacity);
        let router = Arc::new(Router::new(
            Arc::clone(&self.cache),
            stats_tx.clone(),
            Arc::clone(&self.history),
        ));
        let pool = match TransferPool::start(config.max_transfer_threads, queue_rx, router) {
            Ok(pool) => pool,
            Err(e) => {
                // Workers already spawned exit once the queue closes
                drop(queue_tx);
                return Err(abort_start(e, stats_tx, None, saver));
            }
        };

        let scanner = Arc::new(Scanner::new(
            Arc::clone(&self.cache),
            queue_tx,
            Arc::clone(&self.history),
        ));
        let mut scheduler = Scheduler::new(
            Arc::clone(&shared),
            loader,
            hook,
            scanner,
            ScanGate::new(config.max_scan_threads),
            Arc::clone(&self.history),
        );

        let (stop_tx, stop_rx) = bounded(1);
        let name = "scheduler".to_string();
        let scheduler = match thread::Builder::new()
            .name(name.clone())
            .spawn(move || scheduler.run(stop_rx))
        {
            Ok(handle) => handle,
            Err(source) => {
                let e = EngineError::ThreadSpawn { name, source };
                return Err(abort_start(e, stats_tx, Some(pool), saver));
            }
        };

        info!(
            groups = config.scan_groups.len(),
            scan_threads = config.max_scan_threads,
            transfer_threads = pool.size(),
            "Tosser started"
        );

        Ok(RunningTosser {
            config: shared,
            stats: self.stats,
            history: self.history,
            cache: self.cache,
            stat_file: config.stat_file.clone(),
            stats_tx,
            stop: stop_tx,
            scheduler,
            pool,
            saver,
            started,
        })
    }
}

/// Stop the threads `start` spawned before failing with `err`.
///
/// Every queue sender must already be gone so the workers can drain.
fn abort_start(
    err: EngineError,
    stats_tx: Sender<StatMessage>,
    pool: Option<TransferPool>,
    saver: StatSaver,
) -> EngineError {
    drop(stats_tx);
    if let Some(pool) = pool {
        pool.join();
    }
    saver.join();
    err
}

/// Handle to the running pipeline.
pub struct RunningTosser {
    config: Arc<SharedConfig>,
    stats: Arc<TosserStat>,
    history: Arc<ErrorHistory>,
    cache: Arc<ProcessingCache>,
    stat_file: PathBuf,
    stats_tx: Sender<StatMessage>,
    stop: Sender<()>,
    scheduler: JoinHandle<()>,
    pool: TransferPool,
    saver: StatSaver,
    started: DateTime<Local>,
}

impl RunningTosser {
    pub fn config(&self) -> Arc<Config> {
        self.config.current()
    }

    pub fn stats(&self) -> &Arc<TosserStat> {
        &self.stats
    }

    pub fn history(&self) -> &Arc<ErrorHistory> {
        &self.history
    }

    /// Number of directories and files currently in flight.
    pub fn in_flight(&self) -> usize {
        self.cache.len()
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::build(
            &self.stats,
            &self.history,
            self.started,
            Local::now(),
            BuildInfo::current(),
        )
    }

    /// Ask the save task to write a snapshot.
    pub fn request_save(&self) {
        if self.stats_tx.send(StatMessage::Save).is_err() {
            warn!("Statistics task stopped; save request dropped");
        }
    }

    /// Stop scheduling and write the statistics snapshot.
    ///
    /// Scans and transfers already running are not awaited; the process is
    /// expected to exit right after.
    pub fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        info!("Shutting down, saving statistics");
        let saved = self.stats.save(&self.stat_file);
        if let Err(e) = &saved {
            self.history.report(format!("Failed to save statistics: {}", e));
        }
        saved
    }

    /// Stop scheduling and wait for the pipeline to drain, then save.
    ///
    /// Waits for the scheduler to exit, for every queued item to be routed
    /// and for the statistics task to write its final snapshot.
    pub fn shutdown_and_wait(self) -> Result<()> {
        let _ = self.stop.send(());
        let _ = self.scheduler.join();
        // Scans from the last pass still hold queue senders; the pool
        // finishes once they complete.
        self.pool.join();
        drop(self.stats_tx);
        self.saver.join();
        self.stats.save(&self.stat_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::TransferRecord;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_abort_start_stops_saver_and_workers() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let stat_file = temp_dir.path().join("stat.json");
        let stats = Arc::new(TosserStat::new());
        let history = Arc::new(ErrorHistory::new(4));

        let (stats_tx, saver) = StatSaver::spawn(
            Arc::clone(&stats),
            stat_file.clone(),
            Duration::from_secs(3600),
            8,
            Arc::clone(&history),
        )
        .expect("spawn saver");
        let (queue_tx, queue_rx) = bounded::<crate::model::ProcessingItem>(1);
        let router = Arc::new(Router::new(
            Arc::new(ProcessingCache::new()),
            stats_tx.clone(),
            Arc::clone(&history),
        ));
        let pool = TransferPool::start(2, queue_rx, router).expect("start pool");

        let today = Local::now().date_naive();
        stats_tx
            .send(StatMessage::Record(TransferRecord {
                date: today,
                size: 5,
                destinations: vec![PathBuf::from("/out")],
            }))
            .expect("send record");
        drop(queue_tx);

        let err = abort_start(
            EngineError::ThreadSpawn {
                name: "scheduler".to_string(),
                source: io::Error::new(io::ErrorKind::Other, "no threads"),
            },
            stats_tx,
            Some(pool),
            saver,
        );

        assert!(matches!(err, EngineError::ThreadSpawn { .. }));
        // The saver has exited, so its final snapshot is on disk
        let saved = TosserStat::load(&stat_file).expect("load stats");
        assert_eq!(saved.day(today).len(), 1);
        assert_eq!(saved.day(today)[0].0, "/out");
        assert!(history.is_empty());
    }
}
