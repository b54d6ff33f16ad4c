//! Workload-manager drivers.
//!
//! A batch is shipped to a scheduler as a submission script that re-enters
//! this binary (`canary run-batch`) inside the allocation; the inner
//! invocation rebuilds the frozen graph, restricts the ready queue to the
//! batch's cases, and writes per-case artifacts the outer session streams
//! back. Drivers only know how to submit, poll, and cancel — everything
//! else is shared.

mod flux;
mod pbs;
mod shell;
mod slurm;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canary_core::Status;

use crate::batch::Batch;
use crate::error::ConfigError;

pub use flux::FluxDriver;
pub use pbs::PbsDriver;
pub use shell::ShellDriver;
pub use slurm::SlurmDriver;

/// Identifier a driver hands back at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitHandle {
    /// Scheduler job id (or local process key for the shell driver)
    pub id: String,
}

/// Where a submitted batch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting in the scheduler queue
    Queued,
    /// Allocation granted, batch executing
    Running,
    /// Left the queue with this exit code
    Done(i32),
}

/// Per-case record streamed back from a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Canonical case name
    pub name: String,
    /// Terminal status the inner queue recorded
    pub status: Status,
    /// Reason, for Fail/Skip/NotRun
    pub reason: Option<String>,
    /// Raw exit code
    pub exit_code: Option<i32>,
    /// Wall seconds the case ran
    pub duration_secs: Option<f64>,
}

/// One workload-manager backend.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Driver name as used in `-b scheduler=…`.
    fn name(&self) -> &'static str;

    /// Submit the script and return a pollable handle.
    async fn submit(&self, script: &Path) -> anyhow::Result<SubmitHandle>;

    /// Non-blocking look at a submitted batch.
    async fn poll(&self, handle: &SubmitHandle) -> anyhow::Result<PollState>;

    /// Best-effort cancellation.
    async fn cancel(&self, handle: &SubmitHandle) -> anyhow::Result<()>;

    /// Stream back the per-case records a finished batch wrote. The
    /// default reads `results.json` from the batch directory, which the
    /// inner queue always writes on exit.
    async fn fetch_artifacts(&self, batch_dir: &Path) -> anyhow::Result<Vec<CaseRecord>> {
        let path = batch_dir.join("results.json");
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            anyhow::anyhow!("no results at '{}': {e}", path.display())
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Scheduler-directive header lines for the submission script.
    fn script_header(&self, batch: &Batch) -> Vec<String>;
}

/// Look up a driver by its `-b scheduler=…` name.
pub fn driver_for(name: &str) -> Result<Box<dyn SchedulerDriver>, ConfigError> {
    match name {
        "shell" => Ok(Box::new(ShellDriver::default())),
        "slurm" => Ok(Box::new(SlurmDriver)),
        "pbs" => Ok(Box::new(PbsDriver)),
        "flux" => Ok(Box::new(FluxDriver)),
        other => Err(ConfigError::UnknownScheduler(other.to_string())),
    }
}

/// Write the submission script for `batch` into its batch directory and
/// return its path. The script re-invokes this binary's `run-batch`
/// subcommand inside the allocation.
pub fn write_submit_script(
    driver: &dyn SchedulerDriver,
    batch: &Batch,
    session_root: &Path,
    batch_dir: &Path,
) -> anyhow::Result<PathBuf> {
    // CANARY_EXE lets wrappers (and the test suite) pin which binary the
    // allocation re-enters.
    let canary = std::env::var_os("CANARY_EXE")
        .map(PathBuf::from)
        .or_else(|| std::env::current_exe().ok())
        .unwrap_or_else(|| PathBuf::from("canary"));
    let mut lines = vec!["#!/bin/bash".to_string()];
    lines.extend(driver.script_header(batch));
    lines.push(String::new());
    lines.push(format!(
        "exec {} run-batch -d {} --batch {}",
        shell_quote(&canary.to_string_lossy()),
        shell_quote(&session_root.to_string_lossy()),
        batch.id
    ));
    lines.push(String::new());

    let path = batch_dir.join("submit.sh");
    std::fs::write(&path, lines.join("\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

/// Minimal single-quote shell quoting.
fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_alphanumeric() || "./_-=".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Seconds → `HH:MM:SS` for scheduler time limits, rounded up a little so
/// the allocation outlives the batch's own timeouts.
pub(crate) fn walltime(batch: &Batch) -> String {
    let padded = batch.duration.as_secs() + 300;
    canary_core::timeparse::format_hms(std::time::Duration::from_secs(padded))
}
