//! On-disk session state.
//!
//! Layout beneath the session root (`TestResults/` by default):
//!
//! ```text
//! .canary/config                          frozen session configuration
//! .canary/batches/<id>/batch.json         batch membership and sizing
//! .canary/batches/<id>/submit.sh          submission script
//! .canary/batches/<id>/resource_pool.json allocation snapshot
//! .canary/batches/<id>/results.json       per-case records from the batch
//! <relpath>/<case-name>/canary-out.txt    per-case log
//! <relpath>/<case-name>/testcase.lock     resolved spec + runtime state
//! ```
//!
//! Locks double as the resume record: a re-entrant run reloads terminal
//! statuses from them and re-runs only the rest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canary_core::{ParamMap, ResourceSpec, Status};

use crate::batch::Batch;
use crate::case::{Case, CaseId, CaseKind};
use crate::config::SessionConfig;
use crate::graph::CaseGraph;
use crate::pool::PoolSnapshot;
use crate::schedulers::CaseRecord;

/// Well-known locations beneath one session root.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    /// Paths rooted at `root` (the `TestResults/` directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The session root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `.canary/` metadata directory.
    pub fn canary_dir(&self) -> PathBuf {
        self.root.join(".canary")
    }

    /// The frozen configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.canary_dir().join("config")
    }

    /// Directory of one batch's artifacts.
    pub fn batch_dir(&self, id: usize) -> PathBuf {
        self.canary_dir().join("batches").join(id.to_string())
    }

    /// A case's `testcase.lock`.
    pub fn lock_path(&self, case: &Case) -> PathBuf {
        case.workdir(&self.root).join("testcase.lock")
    }

    /// Whether a session already exists here.
    pub fn exists(&self) -> bool {
        self.config_path().is_file()
    }
}

/// Write the frozen configuration.
pub fn save_config(paths: &SessionPaths, config: &SessionConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(paths.canary_dir())?;
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(paths.config_path(), text)
        .with_context(|| format!("cannot write {}", paths.config_path().display()))?;
    Ok(())
}

/// Reload a frozen configuration.
pub fn load_config(paths: &SessionPaths) -> anyhow::Result<SessionConfig> {
    let path = paths.config_path();
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("no session at {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Dependency entry inside a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDep {
    /// Dependency's canonical name
    pub name: String,
    /// Expected-result predicate, rendered
    pub result: String,
}

/// The `testcase.lock` document: the case's resolved spec plus its
/// runtime attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLock {
    /// Canonical name
    pub name: String,
    /// Family
    pub family: String,
    /// Single or multi
    pub kind: CaseKind,
    /// Command template
    pub command: Vec<String>,
    /// Parameter values
    pub params: ParamMap,
    /// Effective keywords
    pub keywords: Vec<String>,
    /// Resource requirement
    pub resources: ResourceSpec,
    /// Wall-clock budget, seconds
    pub timeout_secs: f64,
    /// Resolved dependencies
    pub dependencies: Vec<LockDep>,
    /// Terminal (or pre-masked) status
    pub status: Option<Status>,
    /// Reason for Fail/Skip/NotRun
    pub reason: Option<String>,
    /// Raw exit code
    pub exit_code: Option<i32>,
    /// Launch timestamp
    pub started: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub finished: Option<DateTime<Utc>>,
    /// Batch membership
    pub batch: Option<usize>,
}

impl CaseLock {
    /// Snapshot a case.
    pub fn from_case(case: &Case, graph: &CaseGraph) -> Self {
        Self {
            name: case.name.clone(),
            family: case.family.clone(),
            kind: case.kind,
            command: case.command.clone(),
            params: case.params.clone(),
            keywords: case.keywords.clone(),
            resources: case.resources,
            timeout_secs: case.timeout.as_secs_f64(),
            dependencies: case
                .dependencies
                .iter()
                .map(|edge| LockDep {
                    name: graph.case(edge.dep).name.clone(),
                    result: edge.result.to_string(),
                })
                .collect(),
            status: case.state.status,
            reason: case.state.reason.clone(),
            exit_code: case.state.exit_code,
            started: case.state.started,
            finished: case.state.finished,
            batch: case.state.batch,
        }
    }

    /// Elapsed wall seconds, when both timestamps are present.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started, self.finished) {
            (Some(a), Some(b)) => Some((b - a).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Write one case's lock file. The working directory must exist.
pub fn write_lock(paths: &SessionPaths, graph: &CaseGraph, id: CaseId) -> anyhow::Result<()> {
    let case = graph.case(id);
    let lock = CaseLock::from_case(case, graph);
    let path = paths.lock_path(case);
    let text = serde_json::to_string_pretty(&lock)?;
    std::fs::write(&path, text)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

/// Read one lock file.
pub fn read_lock(path: &Path) -> anyhow::Result<CaseLock> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Re-entrancy: restore terminal statuses recorded by a previous run (or
/// a previous batch) into the freshly frozen graph. Unreadable or stale
/// locks are ignored.
pub fn restore_statuses(paths: &SessionPaths, graph: &mut CaseGraph) -> usize {
    let mut restored = 0;
    for i in 0..graph.cases.len() {
        let case = &graph.cases[i];
        if case.terminal_status().is_some() {
            continue;
        }
        let path = paths.lock_path(case);
        let Ok(lock) = read_lock(&path) else {
            continue;
        };
        if lock.name != case.name {
            continue;
        }
        if let Some(status) = lock.status.filter(|s| s.is_terminal()) {
            let case = &mut graph.cases[i];
            case.state.status = Some(status);
            case.state.reason = lock.reason;
            case.state.exit_code = lock.exit_code;
            case.state.started = lock.started;
            case.state.finished = lock.finished;
            case.state.batch = lock.batch;
            restored += 1;
        }
    }
    restored
}

/// Duration estimates from prior-run locks, for the batch partitioner.
pub fn prior_durations(
    paths: &SessionPaths,
    graph: &CaseGraph,
) -> std::collections::HashMap<CaseId, Duration> {
    let mut estimates = std::collections::HashMap::new();
    for case in &graph.cases {
        if let Ok(lock) = read_lock(&paths.lock_path(case)) {
            if let Some(secs) = lock.duration_secs() {
                estimates.insert(case.id, Duration::from_secs_f64(secs.max(1.0)));
            }
        }
    }
    estimates
}

/// Batch membership record, `batch.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Batch id
    pub id: usize,
    /// Member case ids, arena order
    pub cases: Vec<usize>,
    /// Summed resource requirement
    pub resources: ResourceSpec,
    /// Summed duration estimate, seconds
    pub duration_secs: f64,
}

impl BatchRecord {
    /// Snapshot a batch.
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            id: batch.id,
            cases: batch.cases.iter().map(|c| c.0).collect(),
            resources: batch.resources,
            duration_secs: batch.duration.as_secs_f64(),
        }
    }
}

/// Write a batch's membership record into its directory.
pub fn write_batch_record(paths: &SessionPaths, batch: &Batch) -> anyhow::Result<PathBuf> {
    let dir = paths.batch_dir(batch.id);
    std::fs::create_dir_all(&dir)?;
    let record = BatchRecord::from_batch(batch);
    std::fs::write(
        dir.join("batch.json"),
        serde_json::to_string_pretty(&record)?,
    )?;
    Ok(dir)
}

/// Read a batch's membership record.
pub fn read_batch_record(paths: &SessionPaths, id: usize) -> anyhow::Result<BatchRecord> {
    let path = paths.batch_dir(id).join("batch.json");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Write the per-batch allocation snapshot (`resource_pool.json`).
pub fn write_pool_snapshot(
    paths: &SessionPaths,
    batch_id: usize,
    snapshot: &PoolSnapshot,
) -> anyhow::Result<()> {
    let dir = paths.batch_dir(batch_id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("resource_pool.json"),
        serde_json::to_string_pretty(snapshot)?,
    )?;
    Ok(())
}

/// Write the per-case records a finished batch streams back.
pub fn write_results(
    paths: &SessionPaths,
    batch_id: usize,
    records: &[CaseRecord],
) -> anyhow::Result<()> {
    let dir = paths.batch_dir(batch_id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("results.json"),
        serde_json::to_string_pretty(records)?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Generator;
    use crate::graph::{freeze, FreezeOptions};

    fn sample_graph() -> CaseGraph {
        let g = Generator::new("heat", vec!["./run.sh".to_string()]);
        freeze(&[g], &FreezeOptions::default()).unwrap()
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let mut config = SessionConfig::default();
        config.roots = vec![PathBuf::from("/suite")];
        save_config(&paths, &config).unwrap();
        assert!(paths.exists());
        let back = load_config(&paths).unwrap();
        assert_eq!(back.roots, config.roots);
    }

    #[test]
    fn lock_round_trip_restores_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let mut graph = sample_graph();
        let id = graph.cases[0].id;
        std::fs::create_dir_all(graph.cases[0].workdir(paths.root())).unwrap();

        graph.cases[0].state.status = Some(Status::Diff);
        graph.cases[0].state.exit_code = Some(64);
        write_lock(&paths, &graph, id).unwrap();

        // A fresh freeze of the same input, then restore.
        let mut fresh = sample_graph();
        assert!(fresh.cases[0].terminal_status().is_none());
        let restored = restore_statuses(&paths, &mut fresh);
        assert_eq!(restored, 1);
        assert_eq!(fresh.cases[0].state.status, Some(Status::Diff));
        assert_eq!(fresh.cases[0].state.exit_code, Some(64));
    }

    #[test]
    fn batch_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let batch = Batch {
            id: 0,
            cases: vec![CaseId(0), CaseId(2)],
            resources: ResourceSpec::cpus(4),
            duration: Duration::from_secs(120),
        };
        write_batch_record(&paths, &batch).unwrap();
        let back = read_batch_record(&paths, 0).unwrap();
        assert_eq!(back.cases, vec![0, 2]);
        assert_eq!(back.resources, ResourceSpec::cpus(4));
    }
}
