//! Test support: scripted runners and test-file builders.
//!
//! Used by the unit and integration suites; nothing here runs in a
//! production session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use canary_core::Status;

use crate::case::Case;
use crate::exec::{CaseOutcome, CaseRunner, ExecContext};
use crate::pool::Reservation;

/// A [`CaseRunner`] that returns canned statuses instead of spawning
/// subprocesses, with an optional per-case delay so scheduling behavior
/// (concurrency, ordering, gating) can be observed deterministically.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outcomes: HashMap<String, (Status, Duration)>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    /// Every case passes instantly unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script one case's status.
    pub fn with_status(mut self, name: &str, status: Status) -> Self {
        self.outcomes
            .insert(name.to_string(), (status, Duration::ZERO));
        self
    }

    /// Script one case's status and how long it pretends to run.
    pub fn with_delay(mut self, name: &str, status: Status, delay: Duration) -> Self {
        self.outcomes.insert(name.to_string(), (status, delay));
        self
    }

    /// The most cases that were ever in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseRunner for ScriptedRunner {
    async fn run(
        &self,
        case: &Case,
        _reservation: &Reservation,
        ctx: &ExecContext,
    ) -> CaseOutcome {
        let started = Utc::now();
        let (status, delay) = self
            .outcomes
            .get(&case.name)
            .copied()
            .unwrap_or((Status::Pass, Duration::ZERO));

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let status = tokio::select! {
            _ = tokio::time::sleep(delay) => status,
            _ = ctx.cancel.cancelled() => Status::NotRun,
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        CaseOutcome {
            status,
            reason: None,
            exit_code: match status {
                Status::Pass => Some(0),
                Status::Fail => Some(1),
                Status::Diff => Some(64),
                Status::Skip => Some(63),
                _ => None,
            },
            started,
            finished: Utc::now(),
        }
    }
}

/// Write a `*.canary` test file whose command is an inline shell snippet.
/// Returns the file path.
pub fn write_shell_test(
    dir: &Path,
    file_name: &str,
    extra_directives: &str,
    script: &str,
) -> PathBuf {
    let path = dir.join(file_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create test dirs");
    }
    let body = format!("command = [\"/bin/sh\", \"-c\", {script:?}]\n{extra_directives}\n");
    std::fs::write(&path, body).expect("write test file");
    path
}
