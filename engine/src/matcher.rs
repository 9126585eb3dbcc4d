//! File-name mask matching.
//!
//! Masks are shell-style globs (`*.txt`, `report_??.csv`) matched against
//! the bare file name. They are compiled once when the configuration is
//! loaded.

use std::fmt;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{EngineError, Result};

/// Match/exclude queries answered by rules, scan groups and the global
/// configuration.
pub trait FileFilter {
    /// True if `file_name` is selected by this filter's inclusion masks.
    fn matches(&self, file_name: &str) -> bool;

    /// True if `file_name` is rejected by this filter's exclusion masks.
    fn is_excluded(&self, file_name: &str) -> bool;
}

/// A compiled set of glob masks.
#[derive(Clone)]
pub struct MaskSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl MaskSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| EngineError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| EngineError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            source,
        })?;
        Ok(MaskSet {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            set,
        })
    }

    /// A set that matches nothing.
    pub fn empty() -> Self {
        MaskSet {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.set.is_match(file_name)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for MaskSet {
    fn default() -> Self {
        MaskSet::empty()
    }
}

impl fmt::Debug for MaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MaskSet").field(&self.patterns).finish()
    }
}

impl PartialEq for MaskSet {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns
    }
}
