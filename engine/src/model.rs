//! Core data model for routing work.
//!
//! This module defines the values that flow through the pipeline:
//! - ProcessingItem: one discovered file on its way to the workers
//! - Mode, ExistsPolicy: per-rule transfer behavior
//! - RuleOutcome, SkipReason, ItemReport: what the router decided

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::{Config, ScanGroup};

/// The transfer mode of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Relocate the file; no later rule sees it
    Move,
    /// Duplicate the file; later rules still apply
    Copy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Move => write!(f, "move"),
            Mode::Copy => write!(f, "copy"),
        }
    }
}

/// Policy for handling an existing file at the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ExistsPolicy {
    /// Remove the existing file, then transfer
    Replace,
    /// Leave the existing file alone and abandon the rule
    #[default]
    Skip,
    /// Any other configured value; behaves like `Skip` but is reported
    Unknown(String),
}

impl ExistsPolicy {
    pub fn parse(value: &str) -> Self {
        match value {
            "replace" => ExistsPolicy::Replace,
            "skip" => ExistsPolicy::Skip,
            other => ExistsPolicy::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ExistsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistsPolicy::Replace => write!(f, "replace"),
            ExistsPolicy::Skip => write!(f, "skip"),
            ExistsPolicy::Unknown(v) => write!(f, "{}", v),
        }
    }
}

impl From<ExistsPolicy> for String {
    fn from(policy: ExistsPolicy) -> Self {
        policy.to_string()
    }
}

impl<'de> Deserialize<'de> for ExistsPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ExistsPolicy::parse(&value))
    }
}

/// A discovered file, admitted to the in-flight cache and queued for the
/// transfer workers.
///
/// Carries the configuration snapshot it was discovered under, so a reload
/// mid-flight never changes the rules applied to it.
#[derive(Debug, Clone)]
pub struct ProcessingItem {
    /// Correlation id for log lines about this item
    pub id: Uuid,

    /// Bare file name (no directory)
    pub file_name: String,

    /// Absolute source path; also the in-flight cache key
    pub source_path: PathBuf,

    /// File size in bytes at discovery time
    pub size: u64,

    /// Owning scan group
    pub group: Arc<ScanGroup>,

    /// Configuration snapshot (global exclusions)
    pub config: Arc<Config>,
}

impl ProcessingItem {
    pub fn new(
        file_name: String,
        source_path: PathBuf,
        size: u64,
        group: Arc<ScanGroup>,
        config: Arc<Config>,
    ) -> Self {
        ProcessingItem {
            id: Uuid::new_v4(),
            file_name,
            source_path,
            size,
            group,
            config,
        }
    }
}

/// Why a rule took no action for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// File name does not match the rule's masks
    NoMatch,
    /// File is excluded globally, by the group, or by the rule
    Excluded,
    /// Destination exists and the policy is `skip`
    DestinationExists,
    /// Destination exists and the policy value is not recognized
    UnknownPolicy(String),
    /// Destination resolves to the source file itself
    SameAsSource,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoMatch => write!(f, "no match"),
            SkipReason::Excluded => write!(f, "excluded"),
            SkipReason::DestinationExists => write!(f, "destination exists"),
            SkipReason::UnknownPolicy(v) => write!(f, "unknown if_exists value '{}'", v),
            SkipReason::SameAsSource => write!(f, "destination is the source file"),
        }
    }
}

/// Result of evaluating one rule against one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Moved { destination: PathBuf },
    Copied { destination: PathBuf },
    Skipped(SkipReason),
    Failed(String),
}

impl RuleOutcome {
    /// True if the file reached a destination under this rule.
    pub fn is_success(&self) -> bool {
        matches!(self, RuleOutcome::Moved { .. } | RuleOutcome::Copied { .. })
    }

    pub fn destination(&self) -> Option<&PathBuf> {
        match self {
            RuleOutcome::Moved { destination } | RuleOutcome::Copied { destination } => {
                Some(destination)
            }
            _ => None,
        }
    }
}

/// Everything the router decided for one item, in rule evaluation order.
///
/// Rules after a successful move are not evaluated and do not appear.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item_id: Uuid,
    pub source_path: PathBuf,
    pub outcomes: Vec<(String, RuleOutcome)>,
}

impl ItemReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_success())
    }

    /// Destinations the file was delivered to.
    pub fn destinations(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| o.destination().cloned())
            .collect()
    }

    pub fn outcome(&self, rule: &str) -> Option<&RuleOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == rule)
            .map(|(_, o)| o)
    }
}
