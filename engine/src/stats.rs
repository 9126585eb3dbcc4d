//! Per-day, per-destination transfer statistics.
//!
//! `TosserStat` is the in-memory aggregate; `StatSaver` is the background
//! thread that receives completed transfers from the workers and writes
//! snapshots to disk. The snapshot is JSON:
//!
//! ```json
//! {"dates": {"2024-03-05": {"/out/2024": {"count": 1, "bytes": 100}}}}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::history::ErrorHistory;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Counters for one destination directory on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStat {
    pub count: u64,
    pub bytes: u64,
}

/// Destination directory -> counters.
pub type DayStat = BTreeMap<String, DirStat>;

/// The persisted form: date (`YYYY-MM-DD`) -> day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    #[serde(default)]
    pub dates: BTreeMap<String, DayStat>,
}

/// A successfully routed file, as reported by a transfer worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Local date the transfer completed on
    pub date: NaiveDate,
    pub size: u64,
    /// Every directory a rule delivered the file to
    pub destinations: Vec<PathBuf>,
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Default)]
pub struct TosserStat {
    state: Mutex<StatSnapshot>,
}

impl TosserStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StatSnapshot) -> Self {
        TosserStat {
            state: Mutex::new(snapshot),
        }
    }

    /// Load a snapshot written by `save`. A missing file yields empty
    /// statistics.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No statistics snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(EngineError::StatsIo {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let snapshot: StatSnapshot =
            serde_json::from_slice(&data).map_err(|source| EngineError::StatsFormat {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the full state to `path`, replacing any earlier snapshot.
    ///
    /// The data goes to a sibling temporary file first and is renamed into
    /// place, so readers never see a half-written snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = {
            let state = self.lock();
            serde_json::to_vec_pretty(&*state).map_err(|source| EngineError::StatsFormat {
                path: path.to_path_buf(),
                source,
            })?
        };

        let write_err = |source: io::Error| EngineError::StatsIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stat.json".to_string());
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        fs::write(&tmp, &data).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Credit one file of `bytes` to `dir` on `date`.
    pub fn accumulate(&self, date: NaiveDate, dir: &Path, bytes: u64) {
        let mut state = self.lock();
        let entry = state
            .dates
            .entry(date_key(date))
            .or_default()
            .entry(dir.to_string_lossy().into_owned())
            .or_default();
        entry.count += 1;
        entry.bytes += bytes;
    }

    pub fn record(&self, record: &TransferRecord) {
        for dir in &record.destinations {
            self.accumulate(record.date, dir, record.size);
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        self.lock().clone()
    }

    /// One day's counters, sorted by destination directory.
    pub fn day(&self, date: NaiveDate) -> Vec<(String, DirStat)> {
        self.lock()
            .dates
            .get(&date_key(date))
            .map(|day| day.iter().map(|(dir, stat)| (dir.clone(), *stat)).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, StatSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Messages accepted by the save task.
#[derive(Debug)]
pub enum StatMessage {
    Record(TransferRecord),
    /// Write a snapshot now
    Save,
}

/// The dedicated statistics save task.
pub struct StatSaver {
    handle: JoinHandle<()>,
}

impl StatSaver {
    /// Spawn the save task. Returns the sender the workers report through.
    ///
    /// The task exits, after a final save, once every sender is dropped.
    pub fn spawn(
        stats: Arc<TosserStat>,
        path: PathBuf,
        interval: Duration,
        capacity: usize,
        history: Arc<ErrorHistory>,
    ) -> Result<(Sender<StatMessage>, StatSaver)> {
        let (tx, rx) = bounded(capacity.max(1));
        let name = "stat-saver".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || save_loop(rx, &stats, &path, interval, &history))
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;
        Ok((tx, StatSaver { handle }))
    }

    /// Wait for the task to finish (after all senders are dropped).
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn save_loop(
    rx: Receiver<StatMessage>,
    stats: &TosserStat,
    path: &Path,
    interval: Duration,
    history: &ErrorHistory,
) {
    let mut dirty = false;
    let mut last_save = Instant::now();

    let save = |dirty: &mut bool, last_save: &mut Instant| {
        *last_save = Instant::now();
        match stats.save(path) {
            Ok(()) => {
                *dirty = false;
                debug!(path = %path.display(), "Statistics saved");
            }
            Err(e) => history.report(format!("Failed to save statistics: {}", e)),
        }
    };

    loop {
        let wait = interval.saturating_sub(last_save.elapsed());
        match rx.recv_timeout(wait) {
            Ok(StatMessage::Record(record)) => {
                stats.record(&record);
                dirty = true;
            }
            Ok(StatMessage::Save) => save(&mut dirty, &mut last_save),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if dirty {
                    save(&mut dirty, &mut last_save);
                }
                info!("Statistics save task stopped");
                return;
            }
        }

        if dirty && last_save.elapsed() >= interval {
            save(&mut dirty, &mut last_save);
        }
    }
}
