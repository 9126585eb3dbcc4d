//! Recent operator-facing errors.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::error;

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub time: DateTime<Local>,
    pub message: String,
}

/// A bounded, time-ordered list of recent errors; the oldest entry is
/// evicted once capacity is reached.
#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ErrorHistory {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let record = ErrorRecord {
            time: Local::now(),
            message: message.into(),
        };
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Log `message` at error level and record it.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push(message);
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
