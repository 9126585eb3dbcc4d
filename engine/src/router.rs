//! Rule evaluation for a single queued file.
//!
//! A file is offered to its group's rules in declared order. Each rule either
//! takes no action (no match, excluded, destination occupied), transfers the
//! file, or fails. A successful `move` ends evaluation since the source is
//! gone; a `copy` lets later rules see the file too. Failures are isolated
//! to the rule that produced them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::cache::ProcessingCache;
use crate::config::Rule;
use crate::fs_ops::{self, MoveOutcome};
use crate::history::ErrorHistory;
use crate::matcher::FileFilter;
use crate::model::{ExistsPolicy, ItemReport, Mode, ProcessingItem, RuleOutcome, SkipReason};
use crate::stats::{StatMessage, TransferRecord};
use crate::template;

/// Log target of the transfer journal: one event per delivered file.
pub const TRANSFER_LOG_TARGET: &str = "tosser::transfer";

/// Applies routing rules to queued items and reports completed transfers.
pub struct Router {
    cache: Arc<ProcessingCache>,
    stats: Sender<StatMessage>,
    history: Arc<ErrorHistory>,
}

impl Router {
    pub fn new(
        cache: Arc<ProcessingCache>,
        stats: Sender<StatMessage>,
        history: Arc<ErrorHistory>,
    ) -> Self {
        Router {
            cache,
            stats,
            history,
        }
    }

    /// Route `item` using the current local time for destination templates.
    pub fn route(&self, item: &ProcessingItem) -> ItemReport {
        self.route_at(item, Local::now())
    }

    /// Route `item`, expanding destination templates against `now`.
    ///
    /// The item's source path is released from the in-flight cache when
    /// this returns, whatever the outcome.
    pub fn route_at(&self, item: &ProcessingItem, now: DateTime<Local>) -> ItemReport {
        let mut outcomes = Vec::with_capacity(item.group.rules.len());

        for rule in &item.group.rules {
            let outcome = self.apply_rule(item, rule, &now);
            let moved = matches!(outcome, RuleOutcome::Moved { .. });
            outcomes.push((rule.name.clone(), outcome));
            if moved {
                break;
            }
        }

        let report = ItemReport {
            item_id: item.id,
            source_path: item.source_path.clone(),
            outcomes,
        };

        if report.succeeded() {
            let destinations = report
                .destinations()
                .iter()
                .filter_map(|dst| dst.parent().map(Path::to_path_buf))
                .collect();
            let record = TransferRecord {
                date: now.date_naive(),
                size: item.size,
                destinations,
            };
            if self.stats.send(StatMessage::Record(record)).is_err() {
                warn!(file = %item.source_path.display(), "Statistics task stopped; transfer not counted");
            }
        } else {
            debug!(id = %item.id, file = %item.source_path.display(), "No rule delivered the file");
        }

        self.cache.del(&item.source_path);
        report
    }

    fn apply_rule(&self, item: &ProcessingItem, rule: &Rule, now: &DateTime<Local>) -> RuleOutcome {
        let name = item.file_name.as_str();

        if !rule.matches(name) {
            debug!(rule = %rule.name, file = name, "Rule does not match");
            return RuleOutcome::Skipped(SkipReason::NoMatch);
        }
        if item.config.excludes(&item.group, name) || rule.is_excluded(name) {
            debug!(rule = %rule.name, file = name, "File excluded");
            return RuleOutcome::Skipped(SkipReason::Excluded);
        }

        let destination = match template::resolve(&rule.dst_dir, name, now) {
            Ok(path) => path,
            Err(e) => return self.fail(item, rule, format!("cannot resolve destination: {}", e)),
        };

        if let Err(e) = fs_ops::ensure_parent_dir_exists(&destination) {
            return self.fail(item, rule, e.to_string());
        }

        if fs_ops::same_file(&item.source_path, &destination) {
            self.history.report(format!(
                "[{}] rule '{}': destination {} is the source file, skipping",
                item.group.name,
                rule.name,
                destination.display()
            ));
            return RuleOutcome::Skipped(SkipReason::SameAsSource);
        }

        if fs_ops::path_occupied(&destination) {
            match &rule.if_exists {
                ExistsPolicy::Replace => {
                    if let Err(e) = fs_ops::remove_existing(&destination) {
                        return self.fail(item, rule, e.to_string());
                    }
                    debug!(rule = %rule.name, dst = %destination.display(), "Removed existing destination");
                }
                ExistsPolicy::Skip => {
                    info!(
                        rule = %rule.name,
                        dst = %destination.display(),
                        "Destination exists, skipping"
                    );
                    return RuleOutcome::Skipped(SkipReason::DestinationExists);
                }
                ExistsPolicy::Unknown(value) => {
                    self.history.report(format!(
                        "[{}] rule '{}': unknown if_exists value '{}', skipping {}",
                        item.group.name,
                        rule.name,
                        value,
                        item.source_path.display()
                    ));
                    return RuleOutcome::Skipped(SkipReason::UnknownPolicy(value.clone()));
                }
            }
        }

        match rule.mode {
            Mode::Move => self.transfer_move(item, rule, destination),
            Mode::Copy => self.transfer_copy(item, rule, destination),
        }
    }

    fn transfer_move(&self, item: &ProcessingItem, rule: &Rule, destination: PathBuf) -> RuleOutcome {
        match fs_ops::move_file(&item.source_path, &destination) {
            Ok(how) => {
                if how == MoveOutcome::SourceAlreadyGone {
                    warn!(src = %item.source_path.display(), "Source vanished after cross-volume copy");
                }
                info!(
                    target: TRANSFER_LOG_TARGET,
                    id = %item.id,
                    rule = %rule.name,
                    src = %item.source_path.display(),
                    dst = %destination.display(),
                    bytes = item.size,
                    "Moved"
                );
                RuleOutcome::Moved { destination }
            }
            Err(e) => self.fail(item, rule, e.to_string()),
        }
    }

    fn transfer_copy(&self, item: &ProcessingItem, rule: &Rule, destination: PathBuf) -> RuleOutcome {
        match fs_ops::copy_file(&item.source_path, &destination) {
            Ok(bytes) => {
                info!(
                    target: TRANSFER_LOG_TARGET,
                    id = %item.id,
                    rule = %rule.name,
                    src = %item.source_path.display(),
                    dst = %destination.display(),
                    bytes,
                    "Copied"
                );
                RuleOutcome::Copied { destination }
            }
            Err(e) => self.fail(item, rule, e.to_string()),
        }
    }

    fn fail(&self, item: &ProcessingItem, rule: &Rule, message: String) -> RuleOutcome {
        self.history.report(format!(
            "[{}] rule '{}' failed for {}: {}",
            item.group.name,
            rule.name,
            item.source_path.display(),
            message
        ));
        RuleOutcome::Failed(message)
    }
}
