//! # Tosser Engine - Rule-Driven File Distribution Library
//!
//! The engine behind the `tosser` daemon: it watches source directories,
//! matches discovered files against ordered routing rules and moves or
//! copies them into time-templated destination directories, keeping
//! per-day statistics and a history of recent errors.
//!
//! ## Overview
//!
//! - Scan passes on a fixed interval, at most `max_scan_threads` groups at once
//! - Best-effort in-flight deduplication of directories and files
//! - A fixed pool of transfer workers fed by a bounded queue
//! - Ordered rules: `copy` fans out, a successful `move` ends evaluation
//! - Cross-volume moves fall back to copy + delete
//! - Statistics persisted as JSON by a dedicated save task
//! - Configuration hot reload with whole-value swap
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{Config, ConfigLoader, Tosser};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut loader = ConfigLoader::new("tosser.yaml");
//! let config = loader.load()?;
//!
//! let hook = Arc::new(|_: &Config| -> Result<(), String> { Ok(()) });
//! let running = Tosser::new(config).start(loader, hook)?;
//!
//! println!("{}", running.status().render_text());
//! running.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **config**: YAML configuration, validation, reload
//! - **model**: Items, transfer modes, rule outcomes
//! - **error**: Error types and handling
//! - **template**: strftime expansion of directory templates
//! - **matcher**: File name masks
//! - **cache**: In-flight path cache
//! - **fs_ops**: Low-level filesystem operations
//! - **scanner**: Source directory listing
//! - **router**: Per-file rule evaluation
//! - **pool**: Transfer workers
//! - **scheduler**: Scan loop and scan concurrency gate
//! - **stats**: Statistics aggregation and persistence
//! - **history**: Recent error history
//! - **status**: Operator status report
//! - **daemon**: Wiring and lifecycle

pub mod cache;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fs_ops;
pub mod history;
pub mod matcher;
pub mod model;
pub mod pool;
pub mod router;
pub mod scanner;
pub mod scheduler;
pub mod stats;
pub mod status;
pub mod template;

// Re-export main types and functions
pub use cache::ProcessingCache;
pub use config::{Config, ConfigLoader, LogConfig, Reload, Rule, ScanGroup, SharedConfig};
pub use daemon::{ReloadHook, RunningTosser, Tosser};
pub use error::EngineError;
pub use history::{ErrorHistory, ErrorRecord};
pub use matcher::{FileFilter, MaskSet};
pub use model::{ExistsPolicy, ItemReport, Mode, ProcessingItem, RuleOutcome, SkipReason};
pub use router::{Router, TRANSFER_LOG_TARGET};
pub use scanner::Scanner;
pub use stats::{DirStat, StatSnapshot, TosserStat, TransferRecord};
pub use status::{BuildInfo, StatusReport};
