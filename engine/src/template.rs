//! Time-templated path expansion.
//!
//! Source and destination directories may embed strftime placeholders
//! (`/archive/%Y/%m-%d`). Expansion is pure: the caller supplies the
//! timestamp, so the same template always expands the same way for the
//! same instant.

use std::fmt::Write;
use std::path::{Component, Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::error::{EngineError, Result};

/// Expand strftime placeholders in `template` against `timestamp`.
///
/// Unsupported specifiers are rejected instead of being passed through.
pub fn expand(template: &str, timestamp: &DateTime<Local>) -> Result<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(template).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(EngineError::InvalidTemplate {
            template: template.to_string(),
            reason: "unsupported format specifier".to_string(),
        });
    }

    let mut out = String::with_capacity(template.len() + 8);
    write!(out, "{}", timestamp.format_with_items(items.into_iter())).map_err(|_| {
        EngineError::InvalidTemplate {
            template: template.to_string(),
            reason: "specifier cannot be formatted for this timestamp".to_string(),
        }
    })?;
    Ok(out)
}

/// Expand `dir_template`, join `file_name` (may be empty) and return a
/// lexically cleaned absolute path.
pub fn resolve(dir_template: &str, file_name: &str, timestamp: &DateTime<Local>) -> Result<PathBuf> {
    let dir = expand(dir_template, timestamp)?;
    let joined = if file_name.is_empty() {
        PathBuf::from(&dir)
    } else {
        Path::new(&dir).join(file_name)
    };
    absolute(&joined)
}

/// Make `path` absolute against the working directory and clean it.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| EngineError::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("cannot determine working directory: {}", e),
        })?;
        cwd.join(path)
    };
    Ok(clean(&full))
}

// Drops `.` and folds `..` without touching the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
