//! Read-only status snapshot for operators.

use std::fmt::Write;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::history::{ErrorHistory, ErrorRecord};
use crate::stats::{date_key, TosserStat};

/// Version and build date baked in at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub build_date: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        BuildInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: option_env!("TOSSER_BUILD_DATE").unwrap_or("n/a").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirStatRow {
    pub dir: String,
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Day the rows belong to (`YYYY-MM-DD`)
    pub stat_date: String,
    pub version: String,
    pub build_date: String,
    pub started: DateTime<Local>,
    pub uptime_secs: u64,
    /// Today's counters, sorted by destination directory
    pub dirs: Vec<DirStatRow>,
    /// Recent errors, oldest first
    pub errors: Vec<ErrorRecord>,
}

impl StatusReport {
    pub fn build(
        stats: &TosserStat,
        history: &ErrorHistory,
        started: DateTime<Local>,
        now: DateTime<Local>,
        build: BuildInfo,
    ) -> Self {
        let today = now.date_naive();
        let uptime_ms = (now - started).num_milliseconds().max(0) as u64;
        let dirs = stats
            .day(today)
            .into_iter()
            .map(|(dir, stat)| DirStatRow {
                dir,
                count: stat.count,
                bytes: stat.bytes,
            })
            .collect();

        StatusReport {
            stat_date: date_key(today),
            version: build.version,
            build_date: build.build_date,
            started,
            uptime_secs: (uptime_ms + 500) / 1000,
            dirs,
            errors: history.snapshot(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "tosser {} (built {})", self.version, self.build_date);
        let _ = writeln!(out, "Uptime: {}", format_uptime(self.uptime_secs));
        let _ = writeln!(out);
        let _ = writeln!(out, "Statistics for {}", self.stat_date);

        if self.dirs.is_empty() {
            let _ = writeln!(out, "  (no transfers)");
        } else {
            let width = self.dirs.iter().map(|r| r.dir.len()).max().unwrap_or(0);
            for row in &self.dirs {
                let _ = writeln!(
                    out,
                    "  {:<width$}  {:>8} files  {:>14} bytes",
                    row.dir,
                    row.count,
                    row.bytes,
                    width = width
                );
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Recent errors ({})", self.errors.len());
        for record in &self.errors {
            let _ = writeln!(
                out,
                "  {}  {}",
                record.time.format("%Y-%m-%d %H:%M:%S"),
                record.message
            );
        }
        out
    }
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::path::Path;

    fn build_info() -> BuildInfo {
        BuildInfo {
            version: "1.2.3".to_string(),
            build_date: "2024-03-01".to_string(),
        }
    }

    #[test]
    fn test_report_shows_today_sorted() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 5, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        let started = now - Duration::seconds(3725);

        let stats = TosserStat::new();
        stats.accumulate(now.date_naive(), Path::new("/out/b"), 5);
        stats.accumulate(now.date_naive(), Path::new("/out/a"), 100);
        stats.accumulate(now.date_naive() - Duration::days(1), Path::new("/out/old"), 1);
        let history = ErrorHistory::new(4);
        history.push("disk full");

        let report = StatusReport::build(&stats, &history, started, now, build_info());

        assert_eq!(report.stat_date, "2024-03-05");
        assert_eq!(report.uptime_secs, 3725);
        let dirs: Vec<_> = report.dirs.iter().map(|r| r.dir.as_str()).collect();
        assert_eq!(dirs, vec!["/out/a", "/out/b"]);
        assert_eq!(report.errors.len(), 1);

        let text = report.render_text();
        assert!(text.contains("tosser 1.2.3 (built 2024-03-01)"));
        assert!(text.contains("Uptime: 1h 2m 5s"));
        assert!(text.contains("/out/a"));
        assert!(!text.contains("/out/old"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_empty_report() {
        let now = Local::now();
        let report = StatusReport::build(
            &TosserStat::new(),
            &ErrorHistory::new(1),
            now,
            now,
            BuildInfo::current(),
        );
        assert!(report.dirs.is_empty());
        assert_eq!(report.uptime_secs, 0);
        assert!(report.render_text().contains("(no transfers)"));

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["dirs"].as_array().map_or(false, |a| a.is_empty()));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59), "59s");
        assert_eq!(format_uptime(61), "1m 1s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }
}
