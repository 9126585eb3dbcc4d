//! End-to-end tests of the scan -> queue -> router -> statistics pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver};
use engine::stats::StatMessage;
use engine::{
    Config, ConfigLoader, DirStat, ErrorHistory, ProcessingCache, ProcessingItem, Router,
    RuleOutcome, Scanner, SkipReason, TosserStat, Tosser,
};

/// Scanner and router wired to in-memory channels, driven one pass at a time.
struct Pipeline {
    _temp_dir: tempfile::TempDir,
    root: PathBuf,
    config: Arc<Config>,
    cache: Arc<ProcessingCache>,
    history: Arc<ErrorHistory>,
    stats: TosserStat,
    scanner: Scanner,
    router: Router,
    queue: Receiver<ProcessingItem>,
    stat_messages: Receiver<StatMessage>,
}

impl Pipeline {
    fn new(rules: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        fs::create_dir(root.join("in")).expect("Failed to create in dir");
        let yaml = format!(
            "scan_groups:\n  - name: inbound\n    src_dirs: [\"{root}/in\"]\n    rules:\n{rules}",
            root = root.display(),
            rules = rules.replace("ROOT", &root.display().to_string())
        );
        let config = Arc::new(Config::parse(&yaml, Path::new("pipeline.yaml")).expect("parse config"));

        let cache = Arc::new(ProcessingCache::new());
        let history = Arc::new(ErrorHistory::new(32));
        let (queue_tx, queue) = unbounded();
        let (stats_tx, stat_messages) = unbounded();

        Pipeline {
            _temp_dir: temp_dir,
            root,
            config,
            scanner: Scanner::new(Arc::clone(&cache), queue_tx, Arc::clone(&history)),
            router: Router::new(Arc::clone(&cache), stats_tx, Arc::clone(&history)),
            cache,
            history,
            stats: TosserStat::new(),
            queue,
            stat_messages,
        }
    }

    fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.root.join("in").join(name);
        fs::write(&path, content).expect("Failed to write source file");
        path
    }

    /// Scan every enabled group, then route everything that was queued.
    fn pass(&self) -> Vec<engine::ItemReport> {
        let now = Local::now();
        for group in self.config.enabled_groups() {
            self.scanner.scan_group(group, &self.config, now);
        }
        let reports = self
            .queue
            .try_iter()
            .map(|item| self.router.route(&item))
            .collect();
        for message in self.stat_messages.try_iter() {
            if let StatMessage::Record(record) = message {
                self.stats.record(&record);
            }
        }
        reports
    }

    fn today(&self) -> Vec<(String, DirStat)> {
        self.stats.day(Local::now().date_naive())
    }
}

fn year() -> String {
    Local::now().format("%Y").to_string()
}

#[test]
fn test_move_into_dated_directory() {
    let p = Pipeline::new(
        "      - { name: r1, masks: [\"*.txt\"], dst_dir: \"ROOT/out/%Y\", mode: move, if_exists: skip }\n",
    );
    let src = p.write_source("a.txt", &[7u8; 100]);

    let reports = p.pass();

    let dst_dir = p.root.join("out").join(year());
    assert_eq!(reports.len(), 1);
    assert!(dst_dir.join("a.txt").exists());
    assert!(!src.exists());
    assert_eq!(
        p.today(),
        vec![(
            dst_dir.display().to_string(),
            DirStat {
                count: 1,
                bytes: 100
            }
        )]
    );
    assert!(p.cache.is_empty());
    assert!(p.history.is_empty());
}

#[test]
fn test_existing_destination_with_skip() {
    let p = Pipeline::new(
        "      - { name: r1, masks: [\"*.txt\"], dst_dir: \"ROOT/out/%Y\", mode: move, if_exists: skip }\n",
    );
    let dst_dir = p.root.join("out").join(year());
    fs::create_dir_all(&dst_dir).expect("Failed to create out dir");
    fs::write(dst_dir.join("a.txt"), b"existing").expect("Failed to write existing");
    let src = p.write_source("a.txt", &[1u8; 100]);

    let reports = p.pass();

    assert_eq!(
        reports[0].outcome("r1"),
        Some(&RuleOutcome::Skipped(SkipReason::DestinationExists))
    );
    assert_eq!(fs::read(&src).expect("read source"), vec![1u8; 100]);
    assert_eq!(fs::read(dst_dir.join("a.txt")).expect("read dst"), b"existing");
    assert!(p.today().is_empty());
    assert!(p.history.is_empty());
    // the file stays eligible for the next pass
    assert!(!p.cache.check(&src));
}

#[test]
fn test_existing_destination_with_replace() {
    let p = Pipeline::new(
        "      - { name: r1, dst_dir: \"ROOT/out\", mode: move, if_exists: replace }\n",
    );
    fs::create_dir(p.root.join("out")).expect("Failed to create out dir");
    fs::write(p.root.join("out").join("a.txt"), b"old").expect("Failed to write existing");
    let src = p.write_source("a.txt", b"new content");

    p.pass();

    assert_eq!(
        fs::read(p.root.join("out").join("a.txt")).expect("read dst"),
        b"new content"
    );
    assert!(!src.exists());
    let rows = p.today();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, DirStat { count: 1, bytes: 11 });
}

#[test]
fn test_copy_fan_out_keeps_source_and_permissions() {
    let p = Pipeline::new(concat!(
        "      - { name: one, dst_dir: \"ROOT/one\", mode: copy }\n",
        "      - { name: two, dst_dir: \"ROOT/two\", mode: copy }\n",
    ));
    let src = p.write_source("report.csv", b"a,b,c\n");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).expect("chmod");
    }

    p.pass();

    for dir in ["one", "two"] {
        let dst = p.root.join(dir).join("report.csv");
        assert_eq!(fs::read(&dst).expect("read copy"), b"a,b,c\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dst).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }
    assert!(src.exists());
    assert_eq!(p.today().len(), 2);
}

#[test]
fn test_move_short_circuits_later_rules() {
    let p = Pipeline::new(concat!(
        "      - { name: first, dst_dir: \"ROOT/first\", mode: move }\n",
        "      - { name: second, dst_dir: \"ROOT/second\", mode: copy }\n",
    ));
    p.write_source("a.txt", b"x");

    let reports = p.pass();

    assert_eq!(reports[0].outcomes.len(), 1);
    assert!(p.root.join("first").join("a.txt").exists());
    assert!(!p.root.join("second").exists());
}

#[test]
fn test_in_flight_directory_is_not_listed() {
    let p = Pipeline::new("      - { name: r, dst_dir: \"ROOT/out\", mode: move }\n");
    let src = p.write_source("a.txt", b"x");
    let dir = src.parent().expect("parent").to_path_buf();

    p.cache.add(&dir);
    assert!(p.pass().is_empty());
    assert!(src.exists());

    p.cache.del(&dir);
    assert_eq!(p.pass().len(), 1);
    assert!(!src.exists());
}

#[test]
fn test_unmatched_files_stay_in_place() {
    let p = Pipeline::new(
        "      - { name: r, masks: [\"*.pdf\"], dst_dir: \"ROOT/out\", mode: move }\n",
    );
    let src = p.write_source("notes.txt", b"x");

    let reports = p.pass();

    assert_eq!(
        reports[0].outcome("r"),
        Some(&RuleOutcome::Skipped(SkipReason::NoMatch))
    );
    assert!(src.exists());
    assert!(p.cache.is_empty());
}

#[test]
fn test_statistics_survive_save_and_load() {
    let p = Pipeline::new("      - { name: r, dst_dir: \"ROOT/out/%Y\", mode: copy }\n");
    for (i, size) in [10usize, 20, 30].iter().enumerate() {
        p.write_source(&format!("f{}.bin", i), &vec![0u8; *size]);
    }
    p.pass();

    let stat_file = p.root.join("tmp").join("stat.json");
    p.stats.save(&stat_file).expect("save stats");
    let loaded = TosserStat::load(&stat_file).expect("load stats");

    assert_eq!(loaded.snapshot(), p.stats.snapshot());
    assert_eq!(loaded.today_rows(), vec![DirStat { count: 3, bytes: 60 }]);
}

trait TodayRows {
    fn today_rows(&self) -> Vec<DirStat>;
}

impl TodayRows for TosserStat {
    fn today_rows(&self) -> Vec<DirStat> {
        self.day(Local::now().date_naive())
            .into_iter()
            .map(|(_, stat)| stat)
            .collect()
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn test_daemon_routes_and_saves_on_shutdown() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();
    fs::create_dir(root.join("in")).expect("Failed to create in dir");
    fs::write(root.join("in").join("a.txt"), [0u8; 100]).expect("Failed to write source");
    let stat_file = root.join("state").join("stat.json");

    let config_path = root.join("tosser.yaml");
    fs::write(
        &config_path,
        format!(
            concat!(
                "rescan_interval: 1\n",
                "max_transfer_threads: 2\n",
                "stat_file: \"{stat}\"\n",
                "stat_save_interval: 3600\n",
                "scan_groups:\n",
                "  - name: inbound\n",
                "    src_dirs: [\"{root}/in\"]\n",
                "    rules:\n",
                "      - {{ name: archive, dst_dir: \"{root}/out/%Y\", mode: move }}\n",
            ),
            root = root.display(),
            stat = stat_file.display()
        ),
    )
    .expect("Failed to write config");

    let mut loader = ConfigLoader::new(&config_path);
    let config = loader.load().expect("load config");
    let hook = Arc::new(|_: &Config| -> Result<(), String> { Ok(()) });
    let running = Tosser::new(config).start(loader, hook).expect("start daemon");

    let today = Local::now().date_naive();
    assert!(
        wait_until(Duration::from_secs(10), || !running.stats().day(today).is_empty()),
        "file was not routed in time"
    );
    assert!(root.join("out").join(year()).join("a.txt").exists());

    let status = running.status();
    assert_eq!(status.dirs.len(), 1);
    assert_eq!(status.dirs[0].bytes, 100);

    running.shutdown().expect("shutdown");

    let saved = TosserStat::load(&stat_file).expect("load saved stats");
    assert_eq!(saved.today_rows(), vec![DirStat { count: 1, bytes: 100 }]);
}

#[test]
fn test_daemon_restores_previous_statistics() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();
    let stat_file = root.join("stat.json");

    let previous = TosserStat::new();
    previous.accumulate(Local::now().date_naive(), Path::new("/archive"), 5);
    previous.save(&stat_file).expect("save previous");

    let config_path = root.join("tosser.yaml");
    fs::write(
        &config_path,
        format!("stat_file: \"{}\"\n", stat_file.display()),
    )
    .expect("Failed to write config");

    let mut loader = ConfigLoader::new(&config_path);
    let config = loader.load().expect("load config");
    let tosser = Tosser::new(config);
    assert_eq!(tosser.stats().snapshot(), previous.snapshot());
    assert!(tosser.history().is_empty());

    let hook = Arc::new(|_: &Config| -> Result<(), String> { Ok(()) });
    let running = tosser.start(loader, hook).expect("start daemon");
    running.shutdown_and_wait().expect("shutdown");

    let saved = TosserStat::load(&stat_file).expect("load saved stats");
    assert_eq!(saved.snapshot(), previous.snapshot());
}

#[test]
fn test_daemon_starts_empty_on_corrupt_statistics() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let stat_file = temp_dir.path().join("stat.json");
    fs::write(&stat_file, b"{broken").expect("Failed to write stats");

    let yaml = format!("stat_file: \"{}\"\n", stat_file.display());
    let config = Config::parse(&yaml, Path::new("inline.yaml")).expect("parse config");
    let tosser = Tosser::new(config);

    assert!(tosser.stats().snapshot().dates.is_empty());
    assert_eq!(tosser.history().len(), 1);
}
