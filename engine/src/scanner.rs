//! Source directory scanning.
//!
//! A scan expands each source directory template of a group, lists the
//! regular files it holds and queues the ones that are neither excluded nor
//! already in flight. A directory that is being listed by another scan is
//! skipped for this pass.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::cache::{CacheMark, ProcessingCache};
use crate::config::{Config, ScanGroup};
use crate::error::{EngineError, Result};
use crate::fs_ops;
use crate::history::ErrorHistory;
use crate::model::ProcessingItem;
use crate::template;

/// Feeds discovered files into the transfer queue.
pub struct Scanner {
    cache: Arc<ProcessingCache>,
    queue: Sender<ProcessingItem>,
    history: Arc<ErrorHistory>,
}

impl Scanner {
    pub fn new(
        cache: Arc<ProcessingCache>,
        queue: Sender<ProcessingItem>,
        history: Arc<ErrorHistory>,
    ) -> Self {
        Scanner {
            cache,
            queue,
            history,
        }
    }

    /// Scan every source directory of `group`. Returns how many files were
    /// queued.
    ///
    /// A failing directory is reported and skipped; the others are still
    /// scanned. Queueing blocks while the transfer queue is full.
    pub fn scan_group(&self, group: &Arc<ScanGroup>, config: &Arc<Config>, now: DateTime<Local>) -> usize {
        let mut queued = 0;
        for src in &group.src_dirs {
            match self.scan_dir(group, config, src, &now) {
                Ok(n) => queued += n,
                Err(EngineError::QueueClosed) => {
                    debug!(group = %group.name, "Transfer queue closed, stopping scan");
                    break;
                }
                Err(e) => self.history.report(format!("[{}] scan of '{}' failed: {}", group.name, src, e)),
            }
        }
        if queued > 0 {
            info!(group = %group.name, queued, "Scan queued files");
        }
        queued
    }

    fn scan_dir(
        &self,
        group: &Arc<ScanGroup>,
        config: &Arc<Config>,
        src_template: &str,
        now: &DateTime<Local>,
    ) -> Result<usize> {
        let dir = template::resolve(src_template, "", now)?;

        // A path that exists but is not a directory fails at listing and is reported
        if !dir.exists() {
            if group.create_src {
                fs_ops::ensure_dir_exists(&dir)?;
                info!(group = %group.name, dir = %dir.display(), "Created source directory");
            } else {
                debug!(group = %group.name, dir = %dir.display(), "Source directory missing, skipping");
                return Ok(0);
            }
        }

        if self.cache.check(&dir) {
            debug!(group = %group.name, dir = %dir.display(), "Directory already being scanned");
            return Ok(0);
        }
        let _mark = CacheMark::new(&self.cache, &dir);

        let mut queued = 0;
        for entry in fs_ops::list_regular_files(&dir)? {
            if config.excludes(group, &entry.file_name) {
                debug!(file = %entry.path.display(), "Excluded");
                continue;
            }
            if self.cache.check(&entry.path) {
                debug!(file = %entry.path.display(), "Already in flight");
                continue;
            }
            self.enqueue(group, config, entry.file_name, &entry.path, entry.size)?;
            queued += 1;
        }
        Ok(queued)
    }

    fn enqueue(
        &self,
        group: &Arc<ScanGroup>,
        config: &Arc<Config>,
        file_name: String,
        path: &Path,
        size: u64,
    ) -> Result<()> {
        self.cache.add(path);
        let item = ProcessingItem::new(
            file_name,
            path.to_path_buf(),
            size,
            Arc::clone(group),
            Arc::clone(config),
        );
        debug!(id = %item.id, file = %path.display(), size, "Queued");
        if self.queue.send(item).is_err() {
            self.cache.del(path);
            return Err(EngineError::QueueClosed);
        }
        Ok(())
    }
}
