//! Fixed-size pool of transfer workers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, error};

use crate::error::{EngineError, Result};
use crate::model::ProcessingItem;
use crate::router::Router;

/// Worker threads draining the transfer queue.
///
/// Workers exit once every sender of the queue is dropped and the queue is
/// empty.
pub struct TransferPool {
    workers: Vec<JoinHandle<()>>,
}

impl TransferPool {
    pub fn start(size: usize, queue: Receiver<ProcessingItem>, router: Arc<Router>) -> Result<Self> {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let queue = queue.clone();
            let router = Arc::clone(&router);
            let name = format!("transfer-{}", n);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    for item in queue.iter() {
                        router.route(&item);
                    }
                    debug!("Transfer worker exiting");
                })
                .map_err(|source| EngineError::ThreadSpawn { name, source })?;
            workers.push(handle);
        }
        Ok(TransferPool { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for all workers to finish.
    pub fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                error!("Transfer worker panicked");
            }
        }
    }
}
