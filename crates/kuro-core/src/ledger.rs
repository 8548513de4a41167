//! Run ledger: one JSON document per invocation under the run-log root.
//!
//! A record is written as soon as a run begins and rewritten in full on every
//! change, so a crashed run still leaves its last known state behind. Once a
//! record reaches a terminal status it is frozen. Writing is best effort:
//! failures are logged and never reach the caller.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reconcile::ReconcileStats;

/// Component name of records written by this engine.
pub const INDEXER_COMPONENT: &str = "indexer";
/// Component name of records written by the content acquisition tool.
pub const SCRAPER_COMPONENT: &str = "scraper";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        self != RunStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Sync,
    DryRun,
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub component: String,
    pub kind: RunKind,
    /// A slug, or `"all"`.
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Failure message, partial reason or interrupting signal.
    pub error: Option<String>,
    pub stats: ReconcileStats,
    pub processed_slugs: Vec<String>,
    pub files_written: u64,
    pub metadata: Value,
}

/// Latest records per component, as read back from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunHistory {
    pub last_indexer_run: Option<Value>,
    pub last_scraper_run: Option<Value>,
    pub recent_runs: Vec<Value>,
}

#[derive(Debug)]
struct RunState {
    path: PathBuf,
    record: RunRecord,
}

/// Live handle on a running record. Clones refer to the same record.
#[derive(Debug, Clone)]
pub struct RunHandle {
    state: Arc<Mutex<RunState>>,
}

impl RunHandle {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().record.run_id
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.lock().record.status
    }

    pub fn update_stats(&self, stats: &ReconcileStats) {
        self.mutate(|record| record.stats = *stats);
    }

    pub fn record_files_written(&self, count: u64) {
        self.mutate(|record| record.files_written += count);
    }

    pub fn record_processed(&self, slug: &str) {
        self.mutate(|record| record.processed_slugs.push(slug.to_string()));
    }

    pub fn succeed(&self) {
        self.finish(RunStatus::Success, None);
    }

    pub fn mark_partial(&self, reason: impl Into<String>) {
        self.finish(RunStatus::Partial, Some(reason.into()));
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.finish(RunStatus::Failed, Some(error.into()));
    }

    pub fn mark_interrupted(&self, signal: &str) {
        self.finish(RunStatus::Interrupted, Some(format!("interrupted by {}", signal)));
    }

    fn finish(&self, status: RunStatus, error: Option<String>) {
        let finished = self.mutate(|record| {
            record.status = status;
            record.error = error;
            record.finished_at = Some(Utc::now());
        });
        if finished {
            info!("Run {} finished: {:?}", self.run_id(), status);
        }
    }

    /// Applies `change` and rewrites the file. Returns false when the record
    /// was already terminal.
    fn mutate(&self, change: impl FnOnce(&mut RunRecord)) -> bool {
        let mut state = self.lock();
        if state.record.status.is_terminal() {
            debug!(
                "Ignoring change to finished run {}",
                state.record.run_id
            );
            return false;
        }
        change(&mut state.record);
        write_record(&state.path, &state.record);
        true
    }
}

/// Creates run records and reads them back.
#[derive(Debug, Clone)]
pub struct RunLedger {
    dir: PathBuf,
    open: Arc<Mutex<Vec<RunHandle>>>,
}

impl RunLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts a record and persists it with status `running`.
    pub fn begin(&self, component: &str, kind: RunKind, scope: &str, metadata: Value) -> RunHandle {
        let started_at = Utc::now();
        let record = RunRecord {
            run_id: Uuid::new_v4(),
            component: component.to_string(),
            kind,
            scope: scope.to_string(),
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            error: None,
            stats: ReconcileStats::default(),
            processed_slugs: Vec::new(),
            files_written: 0,
            metadata,
        };
        let path = self.reserve_path(component, started_at.timestamp());
        write_record(&path, &record);
        info!("Run {} started ({} {})", record.run_id, component, scope);

        let handle = RunHandle {
            state: Arc::new(Mutex::new(RunState { path, record })),
        };
        if let Ok(mut open) = self.open.lock() {
            open.retain(|h| !h.status().is_terminal());
            open.push(handle.clone());
        }
        handle
    }

    /// Marks every still-running record as interrupted. Returns how many
    /// were open.
    pub fn interrupt_open(&self, signal: &str) -> usize {
        let Ok(mut open) = self.open.lock() else {
            return 0;
        };
        let mut count = 0;
        for handle in open.drain(..) {
            if !handle.status().is_terminal() {
                handle.mark_interrupted(signal);
                count += 1;
            }
        }
        if count > 0 {
            warn!("Interrupted {} open run(s) on {}", count, signal);
        }
        count
    }

    /// Reads stored records, newest first.
    ///
    /// Files that fail to parse are skipped. A missing directory yields an
    /// empty history.
    pub fn history(&self, limit: usize) -> RunHistory {
        let mut history = RunHistory::default();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return history;
        };

        let mut files: Vec<(i64, String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let stamp = started_stamp(&name)?;
                Some((stamp, name, e.path()))
            })
            .collect();
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        for (_, _, path) in files {
            let Some(data) = read_record(&path) else {
                continue;
            };
            match data.get("component").and_then(Value::as_str) {
                Some(INDEXER_COMPONENT) if history.last_indexer_run.is_none() => {
                    history.last_indexer_run = Some(data.clone());
                }
                Some(SCRAPER_COMPONENT) if history.last_scraper_run.is_none() => {
                    history.last_scraper_run = Some(data.clone());
                }
                _ => {}
            }
            if history.recent_runs.len() < limit {
                history.recent_runs.push(data);
            }
            if history.recent_runs.len() >= limit
                && history.last_indexer_run.is_some()
                && history.last_scraper_run.is_some()
            {
                break;
            }
        }

        history
    }

    /// Picks `{component}_{unix}.json`, or `{component}_{unix}-{n}.json` when
    /// that name is taken, and creates the file so it stays taken.
    fn reserve_path(&self, component: &str, unix: i64) -> PathBuf {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Cannot create run log directory {}: {}", self.dir.display(), e);
        }
        let mut n = 0;
        loop {
            let name = match n {
                0 => format!("{}_{}.json", component, unix),
                _ => format!("{}_{}-{}.json", component, unix, n),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                _ => return path,
            }
        }
    }
}

/// Start time encoded in a record file name.
fn started_stamp(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".json")?;
    let (_, stamp) = stem.rsplit_once('_')?;
    let stamp = stamp.split_once('-').map_or(stamp, |(unix, _)| unix);
    stamp.parse().ok()
}

fn read_record(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Skipping unreadable run record {}: {}", path.display(), e);
            None
        }
    }
}

fn write_record(path: &Path, record: &RunRecord) {
    let result = serde_json::to_string_pretty(record)
        .map_err(std::io::Error::from)
        .and_then(|json| fs::write(path, json));
    if let Err(e) = result {
        warn!("Failed to write run record {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read(path: &Path) -> RunRecord {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_begin_writes_running_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("runs"));
        let handle = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", json!({"force": true}));

        let path = handle.path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("indexer_") && name.ends_with(".json"));

        let record = read(&path);
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.scope, "all");
        assert_eq!(record.metadata["force"], true);
        assert!(record.finished_at.is_none());
    }

    #[test]
    fn test_mutations_rewrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path());
        let handle = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", Value::Null);

        let stats = ReconcileStats {
            titles: 2,
            pages_added: 5,
            ..ReconcileStats::default()
        };
        handle.update_stats(&stats);
        handle.record_processed("one-piece");
        handle.record_files_written(3);
        handle.succeed();

        let record = read(&handle.path());
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.stats, stats);
        assert_eq!(record.processed_slugs, vec!["one-piece"]);
        assert_eq!(record.files_written, 3);
        assert!(record.finished_at.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_terminal_record_is_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path());
        let handle = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", Value::Null);
        handle.fail("disk on fire");
        handle.succeed();
        handle.record_processed("late");

        let record = read(&handle.path());
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("disk on fire"));
        assert!(record.processed_slugs.is_empty());
    }

    #[test]
    fn test_partial_keeps_reason() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path());
        let handle = ledger.begin(INDEXER_COMPONENT, RunKind::DryRun, "berserk", Value::Null);
        handle.mark_partial("1 entry skipped");

        let raw: Value = serde_json::from_str(&fs::read_to_string(handle.path()).unwrap()).unwrap();
        assert_eq!(raw["status"], "partial");
        assert_eq!(raw["kind"], "dry_run");
        assert_eq!(raw["error"], "1 entry skipped");
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path());
        let first = ledger.reserve_path("indexer", 1700000000);
        let second = ledger.reserve_path("indexer", 1700000000);
        assert_eq!(first.file_name().unwrap(), "indexer_1700000000.json");
        assert_eq!(second.file_name().unwrap(), "indexer_1700000000-1.json");
    }

    #[test]
    fn test_interrupt_open() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path());
        let done = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", Value::Null);
        done.succeed();
        let running = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", Value::Null);

        assert_eq!(ledger.interrupt_open("SIGINT"), 1);
        assert_eq!(running.status(), RunStatus::Interrupted);
        assert_eq!(done.status(), RunStatus::Success);
        assert_eq!(read(&running.path()).error.as_deref(), Some("interrupted by SIGINT"));
        assert_eq!(ledger.interrupt_open("SIGINT"), 0);
    }

    #[test]
    fn test_unwritable_directory_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let ledger = RunLedger::new(blocker.join("runs"));
        let handle = ledger.begin(INDEXER_COMPONENT, RunKind::Sync, "all", Value::Null);
        handle.succeed();
        assert_eq!(handle.status(), RunStatus::Success);
    }

    #[test]
    fn test_started_stamp() {
        assert_eq!(started_stamp("indexer_1700000000.json"), Some(1700000000));
        assert_eq!(started_stamp("indexer_1700000000-2.json"), Some(1700000000));
        assert_eq!(started_stamp("my_tool_12.json"), Some(12));
        assert_eq!(started_stamp("notes.txt"), None);
        assert_eq!(started_stamp("indexer.json"), None);
    }

    #[test]
    fn test_history() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, component: &str| {
            let body = json!({"component": component, "status": "success", "name": name});
            fs::write(dir.path().join(name), body.to_string()).unwrap();
        };
        write("indexer_100.json", "indexer");
        write("indexer_300.json", "indexer");
        write("scraper_200.json", "scraper");
        fs::write(dir.path().join("indexer_400.json"), "{ broken").unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let history = RunLedger::new(dir.path()).history(2);
        assert_eq!(history.last_indexer_run.unwrap()["name"], "indexer_300.json");
        assert_eq!(history.last_scraper_run.unwrap()["name"], "scraper_200.json");
        let names: Vec<_> = history.recent_runs.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("indexer_300.json"), json!("scraper_200.json")]);
    }

    #[test]
    fn test_history_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunLedger::new(dir.path().join("absent")).history(10);
        assert_eq!(history, RunHistory::default());
    }
}
