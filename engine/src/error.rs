//! Error types for the tosser engine.
//!
//! The primary error type is `EngineError`, which represents failures of a
//! single filesystem step, a configuration load, or a statistics save.
//! Routing decisions that are not failures (no match, excluded, destination
//! exists under `skip`) are reported as `RuleOutcome` values instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while scanning, routing, transferring, or
/// persisting state.
///
/// None of these stop the daemon on their own: the caller logs them,
/// records them in the error history, and abandons only the affected
/// rule, item, or directory.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source file or directory does not exist
    #[error("Source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source file is not accessible for read-write (checked before a cross-volume move)
    #[error("Source access denied: {}: {source}", path.display())]
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read file: {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to destination file
    #[error("Failed to write file: {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to remove a file (existing destination, or source after a copy)
    #[error("Failed to remove file: {}: {source}", path.display())]
    RemoveFailed { path: PathBuf, source: io::Error },

    /// Failed to list a source directory
    #[error("Failed to enumerate directory: {}: {source}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// A time template contains an unsupported specifier
    #[error("Invalid time template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// A path could not be resolved
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A file mask is not a valid glob
    #[error("Invalid mask '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration {}: {source}", path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// Configuration file is not valid YAML for the expected schema
    #[error("Failed to parse configuration {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Statistics snapshot could not be written or read
    #[error("Statistics file error: {}: {source}", path.display())]
    StatsIo { path: PathBuf, source: io::Error },

    /// Statistics snapshot is not valid JSON
    #[error("Statistics file is malformed: {}: {source}", path.display())]
    StatsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The work queue has no consumers left
    #[error("Work queue closed")]
    QueueClosed,

    /// A worker, scan or background thread could not be started
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn { name: String, source: io::Error },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::StatsIo { source, .. }
            | Self::ThreadSpawn { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True when the underlying I/O error is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SourceNotFound { .. } => true,
            Self::SourceAccessDenied { source, .. }
            | Self::ReadError { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::EnumerationFailed { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
