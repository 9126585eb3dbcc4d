//! The scan loop.
//!
//! Every pass dispatches one scan task per enabled group, each holding a
//! slot of the `ScanGate` for as long as it runs. The loop does not wait for
//! a pass to finish: after dispatching it reloads the configuration, sleeps,
//! and starts the next pass, so slow scans overlap with later passes up to
//! the gate's capacity.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use crate::config::{ConfigLoader, Reload, SharedConfig};
use crate::daemon::ReloadHook;
use crate::history::ErrorHistory;
use crate::scanner::Scanner;

/// Counting semaphore bounding concurrently running scan tasks.
#[derive(Clone)]
pub struct ScanGate {
    slots: Sender<()>,
    release: Receiver<()>,
}

impl ScanGate {
    pub fn new(capacity: usize) -> Self {
        let (slots, release) = bounded(capacity.max(1));
        ScanGate { slots, release }
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> ScanPermit {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.slots.send(());
        ScanPermit {
            release: self.release.clone(),
        }
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.slots.len()
    }
}

/// A held scan slot; released on drop.
pub struct ScanPermit {
    release: Receiver<()>,
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        let _ = self.release.try_recv();
    }
}

pub struct Scheduler {
    config: Arc<SharedConfig>,
    loader: ConfigLoader,
    hook: Arc<dyn ReloadHook>,
    scanner: Arc<Scanner>,
    gate: ScanGate,
    history: Arc<ErrorHistory>,
}

impl Scheduler {
    pub fn new(
        config: Arc<SharedConfig>,
        loader: ConfigLoader,
        hook: Arc<dyn ReloadHook>,
        scanner: Arc<Scanner>,
        gate: ScanGate,
        history: Arc<ErrorHistory>,
    ) -> Self {
        Scheduler {
            config,
            loader,
            hook,
            scanner,
            gate,
            history,
        }
    }

    /// Run passes until `stop` receives a message or is disconnected.
    pub fn run(&mut self, stop: Receiver<()>) {
        info!(config = %self.loader.path().display(), "Scheduler started");
        loop {
            // Scan threads are detached; the gate bounds how many run at once.
            drop(self.run_pass());
            self.reload();

            let interval = self.config.current().rescan_interval;
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Scheduler stopped");
    }

    /// Dispatch one scan task per enabled group of the current
    /// configuration. Blocks while the gate is full.
    pub fn run_pass(&self) -> Vec<JoinHandle<()>> {
        let config = self.config.current();
        let now = Local::now();
        let mut handles = Vec::new();

        for group in config.enabled_groups() {
            let permit = self.gate.acquire();
            let scanner = Arc::clone(&self.scanner);
            let group = Arc::clone(group);
            let config = Arc::clone(&config);
            let spawned = thread::Builder::new()
                .name(format!("scan-{}", group.name))
                .spawn(move || {
                    let _permit = permit;
                    scanner.scan_group(&group, &config, now);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => self
                    .history
                    .report(format!("Failed to start scan task: {}", e)),
            }
        }
        debug!(groups = handles.len(), "Scan pass dispatched");
        handles
    }

    /// Pick up configuration changes. Returns true if a new configuration
    /// was swapped in.
    ///
    /// The reload hook runs first; if it rejects the new configuration the
    /// current one stays active.
    pub fn reload(&mut self) -> bool {
        match self.loader.reload() {
            Ok(Reload::Unchanged) => false,
            Ok(Reload::Updated(config)) => {
                if let Err(e) = self.hook.on_reload(&config) {
                    self.history
                        .report(format!("Configuration reload rejected, keeping previous: {}", e));
                    return false;
                }
                let groups = config.scan_groups.len();
                self.config.replace(config);
                info!(groups, "Configuration reloaded");
                true
            }
            Err(e) => {
                self.history
                    .report(format!("Configuration reload failed, keeping previous: {}", e));
                false
            }
        }
    }
}
