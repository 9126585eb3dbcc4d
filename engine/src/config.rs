//! Configuration loading, validation and hot reload.
//!
//! The on-disk format is YAML. Parsing goes through the `*File` structs,
//! which are then compiled into `Config`: masks become `MaskSet`s and scan
//! groups are wrapped in `Arc` so queued items can hold on to the exact
//! group they were discovered under.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::matcher::{FileFilter, MaskSet};
use crate::model::{ExistsPolicy, Mode};
use crate::template;

fn default_max_scan_threads() -> usize {
    4
}

fn default_max_transfer_threads() -> usize {
    4
}

fn default_rescan_interval() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_stat_file() -> PathBuf {
    PathBuf::from("tmp/stat.json")
}

fn default_stat_save_interval() -> u64 {
    60
}

fn default_error_history_size() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_masks() -> Vec<String> {
    vec!["*".to_string()]
}

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_max_scan_threads")]
    pub max_scan_threads: usize,
    #[serde(default = "default_max_transfer_threads")]
    pub max_transfer_threads: usize,
    /// Seconds between scan passes
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Global exclusion masks
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub enable_http: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_stat_file")]
    pub stat_file: PathBuf,
    /// Seconds between statistics snapshots
    #[serde(default = "default_stat_save_interval")]
    pub stat_save_interval: u64,
    #[serde(default = "default_error_history_size")]
    pub error_history_size: usize,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub scan_groups: Vec<ScanGroupFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `engine=debug,info`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the daily-rolling log file; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanGroupFile {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub create_src: bool,
    pub src_dirs: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    pub name: String,
    #[serde(default = "default_masks")]
    pub masks: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub dst_dir: String,
    pub mode: Mode,
    #[serde(default)]
    pub if_exists: ExistsPolicy,
}

/// A routing rule, in the order it was declared within its group.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub masks: MaskSet,
    pub exclude: MaskSet,
    /// Destination directory template
    pub dst_dir: String,
    pub mode: Mode,
    pub if_exists: ExistsPolicy,
}

impl FileFilter for Rule {
    fn matches(&self, file_name: &str) -> bool {
        self.masks.is_match(file_name)
    }

    fn is_excluded(&self, file_name: &str) -> bool {
        self.exclude.is_match(file_name)
    }
}

/// A named set of source directories sharing exclusions and rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanGroup {
    pub name: String,
    pub enabled: bool,
    pub create_src: bool,
    /// Source directory templates
    pub src_dirs: Vec<String>,
    pub exclude: MaskSet,
    pub rules: Vec<Rule>,
}

impl ScanGroup {
    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.exclude.is_match(file_name)
    }
}

/// The compiled, validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_scan_threads: usize,
    pub max_transfer_threads: usize,
    pub rescan_interval: Duration,
    pub queue_capacity: usize,
    pub exclude: MaskSet,
    pub enable_http: bool,
    pub listen: String,
    pub stat_file: PathBuf,
    pub stat_save_interval: Duration,
    pub error_history_size: usize,
    pub log: LogConfig,
    pub scan_groups: Vec<Arc<ScanGroup>>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse configuration from a YAML string; `origin` is used in errors.
    pub fn parse(yaml: &str, origin: &Path) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(yaml).map_err(|source| EngineError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::compile(file)
    }

    /// Validate a parsed file and compile its masks.
    pub fn compile(file: ConfigFile) -> Result<Self> {
        validate(&file)?;

        let mut scan_groups = Vec::with_capacity(file.scan_groups.len());
        for group in &file.scan_groups {
            let mut rules = Vec::with_capacity(group.rules.len());
            for rule in &group.rules {
                let masks = if rule.masks.is_empty() {
                    default_masks()
                } else {
                    rule.masks.clone()
                };
                rules.push(Rule {
                    name: rule.name.clone(),
                    masks: MaskSet::new(&masks)?,
                    exclude: MaskSet::new(&rule.exclude)?,
                    dst_dir: rule.dst_dir.clone(),
                    mode: rule.mode,
                    if_exists: rule.if_exists.clone(),
                });
            }
            scan_groups.push(Arc::new(ScanGroup {
                name: group.name.clone(),
                enabled: group.enabled,
                create_src: group.create_src,
                src_dirs: group.src_dirs.clone(),
                exclude: MaskSet::new(&group.exclude)?,
                rules,
            }));
        }

        Ok(Config {
            max_scan_threads: file.max_scan_threads,
            max_transfer_threads: file.max_transfer_threads,
            rescan_interval: Duration::from_secs(file.rescan_interval),
            queue_capacity: file.queue_capacity,
            exclude: MaskSet::new(&file.exclude)?,
            enable_http: file.enable_http,
            listen: file.listen,
            stat_file: file.stat_file,
            stat_save_interval: Duration::from_secs(file.stat_save_interval),
            error_history_size: file.error_history_size,
            log: file.log,
            scan_groups,
        })
    }

    /// True if `file_name` is excluded globally.
    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.exclude.is_match(file_name)
    }

    /// Global or group-level exclusion, as applied before a file is queued.
    pub fn excludes(&self, group: &ScanGroup, file_name: &str) -> bool {
        self.is_excluded(file_name) || group.is_excluded(file_name)
    }

    pub fn enabled_groups(&self) -> impl Iterator<Item = &Arc<ScanGroup>> {
        self.scan_groups.iter().filter(|g| g.enabled)
    }

    /// Settings that are fixed once the pools are running.
    pub fn startup_settings_differ(&self, other: &Config) -> bool {
        self.max_scan_threads != other.max_scan_threads
            || self.max_transfer_threads != other.max_transfer_threads
            || self.queue_capacity != other.queue_capacity
            || self.stat_file != other.stat_file
    }
}

fn validate(file: &ConfigFile) -> Result<()> {
    let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

    if file.max_scan_threads == 0 {
        return invalid("max_scan_threads must be at least 1".to_string());
    }
    if file.max_transfer_threads == 0 {
        return invalid("max_transfer_threads must be at least 1".to_string());
    }
    if file.rescan_interval == 0 {
        return invalid("rescan_interval must be at least 1 second".to_string());
    }
    if file.queue_capacity == 0 {
        return invalid("queue_capacity must be at least 1".to_string());
    }
    if file.stat_save_interval == 0 {
        return invalid("stat_save_interval must be at least 1 second".to_string());
    }
    if file.error_history_size == 0 {
        return invalid("error_history_size must be at least 1".to_string());
    }

    let now = Local::now();
    let mut group_names = std::collections::HashSet::new();
    for group in &file.scan_groups {
        if group.name.trim().is_empty() {
            return invalid("scan group name must not be empty".to_string());
        }
        if !group_names.insert(group.name.as_str()) {
            return invalid(format!("duplicate scan group '{}'", group.name));
        }
        if group.src_dirs.is_empty() {
            return invalid(format!("scan group '{}' has no src_dirs", group.name));
        }
        for src in &group.src_dirs {
            template::expand(src, &now)?;
        }

        let mut rule_names = std::collections::HashSet::new();
        for rule in &group.rules {
            if !rule_names.insert(rule.name.as_str()) {
                return invalid(format!(
                    "duplicate rule '{}' in scan group '{}'",
                    rule.name, group.name
                ));
            }
            if rule.dst_dir.trim().is_empty() {
                return invalid(format!(
                    "rule '{}' in scan group '{}' has an empty dst_dir",
                    rule.name, group.name
                ));
            }
            template::expand(&rule.dst_dir, &now)?;
        }
    }
    Ok(())
}

/// Outcome of a reload attempt.
#[derive(Debug)]
pub enum Reload {
    /// The file has not been modified since the last read
    Unchanged,
    Updated(Config),
}

/// Reads the configuration file and detects changes by modification time.
#[derive(Debug)]
pub struct ConfigLoader {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigLoader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ConfigLoader {
            path: path.into(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file unconditionally.
    pub fn load(&mut self) -> Result<Config> {
        self.last_modified = self.modified()?;
        Config::load(&self.path)
    }

    /// Read the file only if it changed since the last read.
    ///
    /// A file that fails to parse is remembered too, so the same broken
    /// content is reported once rather than on every pass.
    pub fn reload(&mut self) -> Result<Reload> {
        let modified = self.modified()?;
        if modified.is_some() && modified == self.last_modified {
            debug!(path = %self.path.display(), "Configuration not modified");
            return Ok(Reload::Unchanged);
        }
        self.last_modified = modified;
        Config::load(&self.path).map(Reload::Updated)
    }

    fn modified(&self) -> Result<Option<SystemTime>> {
        let metadata = std::fs::metadata(&self.path).map_err(|source| EngineError::ConfigRead {
            path: self.path.clone(),
            source,
        })?;
        Ok(metadata.modified().ok())
    }
}

/// The live configuration, replaced wholesale on reload.
#[derive(Debug)]
pub struct SharedConfig {
    inner: RwLock<Arc<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        SharedConfig {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn current(&self) -> Arc<Config> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in `config`, returning the previous snapshot.
    pub fn replace(&self, config: Config) -> Arc<Config> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(config);
        if guard.startup_settings_differ(&next) {
            warn!("Pool sizes, queue capacity or stat_file changed; new values apply after restart");
        }
        std::mem::replace(&mut *guard, next)
    }
}
