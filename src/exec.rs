//! Case execution.
//!
//! A worker task runs one case: open the log, spawn the command in the
//! case's working directory with the canary environment, enforce the
//! wall-clock budget, and map the raw exit into a terminal status. The
//! subprocess is put in its own process group so a timeout or cancellation
//! can signal the whole tree, with a grace period between SIGTERM and
//! SIGKILL.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use canary_core::{ParamMap, Status};

use crate::case::{Case, CaseKind};
use crate::pool::Reservation;

/// Seconds between graceful termination and the forced kill.
pub const KILL_GRACE: Duration = Duration::from_secs(10);

/// Exit code a test uses to report "skipped at runtime".
pub const EXIT_SKIP: i32 = 63;
/// Exit code a test uses to report "completed but differed".
pub const EXIT_DIFF: i32 = 64;

/// Session-level inputs a worker needs to run a case.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Root of the session tree (working directories live beneath it)
    pub session_root: PathBuf,
    /// Session cancel flag
    pub cancel: CancellationToken,
}

/// What a worker reports back to the coordinator.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    /// Final (possibly inverted) terminal status
    pub status: Status,
    /// Reason for Fail/Skip/NotRun statuses
    pub reason: Option<String>,
    /// Raw exit code, when the subprocess ran to completion
    pub exit_code: Option<i32>,
    /// Launch time
    pub started: chrono::DateTime<Utc>,
    /// Completion time
    pub finished: chrono::DateTime<Utc>,
}

/// Runs one case to completion. The process-backed implementation is
/// [`ProcessRunner`]; tests substitute their own.
#[async_trait]
pub trait CaseRunner: Send + Sync {
    /// Run `case` under `reservation` and report its outcome. Must not
    /// panic; every failure mode maps to a terminal status.
    async fn run(&self, case: &Case, reservation: &Reservation, ctx: &ExecContext)
        -> CaseOutcome;
}

/// The real, subprocess-backed runner.
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CaseRunner for ProcessRunner {
    async fn run(
        &self,
        case: &Case,
        reservation: &Reservation,
        ctx: &ExecContext,
    ) -> CaseOutcome {
        let started = Utc::now();
        let fail = |reason: String| CaseOutcome {
            status: Status::Fail,
            reason: Some(reason),
            exit_code: None,
            started,
            finished: Utc::now(),
        };

        let workdir = case.workdir(&ctx.session_root);
        if let Err(e) = std::fs::create_dir_all(&workdir) {
            return fail(format!("cannot create working directory: {e}"));
        }
        let log = match std::fs::File::create(case.log_path(&ctx.session_root)) {
            Ok(f) => f,
            Err(e) => return fail(format!("cannot open log file: {e}")),
        };
        let log_err = match log.try_clone() {
            Ok(f) => f,
            Err(e) => return fail(format!("cannot open log file: {e}")),
        };

        let argv = substitute_command(&case.command, &case.params);
        if argv.is_empty() {
            return fail("empty command".to_string());
        }
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        apply_env(&mut command, case, reservation, ctx);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return fail(format!("cannot spawn '{}': {e}", argv[0])),
        };
        let pid = child.id();

        tokio::select! {
            exit = child.wait() => {
                let finished = Utc::now();
                let (status, reason, code) = match exit {
                    Ok(exit) => match exit.code() {
                        Some(code) => (map_exit_code(code), None, Some(code)),
                        None => (
                            Status::Fail,
                            Some("killed by signal".to_string()),
                            None,
                        ),
                    },
                    Err(e) => (Status::Fail, Some(format!("wait failed: {e}")), None),
                };
                let status = apply_inversions(status, code, case);
                CaseOutcome { status, reason, exit_code: code, started, finished }
            }
            _ = tokio::time::sleep(case.timeout) => {
                terminate(&mut child, pid).await;
                CaseOutcome {
                    status: Status::Timeout,
                    reason: Some(format!(
                        "exceeded timeout of {:.1}s",
                        case.timeout.as_secs_f64()
                    )),
                    exit_code: None,
                    started,
                    finished: Utc::now(),
                }
            }
            _ = ctx.cancel.cancelled() => {
                terminate(&mut child, pid).await;
                CaseOutcome {
                    status: Status::NotRun,
                    reason: Some("session cancelled".to_string()),
                    exit_code: None,
                    started,
                    finished: Utc::now(),
                }
            }
        }
    }
}

/// Graceful stop: SIGTERM to the process group, a bounded grace wait, then
/// SIGKILL.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, libc::SIGTERM);
    let graceful =
        tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok();
    if !graceful {
        signal_group(pid, libc::SIGKILL);
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        // The child was spawned as its own process group leader, so the
        // group id equals its pid.
        unsafe {
            libc::killpg(pid as i32, signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: i32) {}

/// Map a raw exit code to its uninverted terminal status.
pub fn map_exit_code(code: i32) -> Status {
    match code {
        0 => Status::Pass,
        EXIT_SKIP => Status::Skip,
        EXIT_DIFF => Status::Diff,
        _ => Status::Fail,
    }
}

/// Apply xfail/xdiff inversions to a raw terminal status.
///
/// `xfail`: Pass becomes XPass (a failure: the expected failure did not
/// happen) and Fail becomes XFail (a success) when the exit code matches
/// the declared one, or unconditionally when no code was declared. The
/// same pattern applies to `xdiff` with Diff.
pub fn apply_inversions(status: Status, exit_code: Option<i32>, case: &Case) -> Status {
    if let Some(xfail) = case.xfail {
        match status {
            Status::Pass => return Status::XPass,
            Status::Fail => {
                let matches = match xfail.code {
                    Some(expected) => exit_code == Some(expected),
                    None => true,
                };
                if matches {
                    return Status::XFail;
                }
            }
            _ => {}
        }
    }
    if case.xdiff {
        match status {
            Status::Pass => return Status::XPass,
            Status::Diff => return Status::XFail,
            _ => {}
        }
    }
    status
}

/// Replace `{name}` placeholders in the command template with the case's
/// parameter values.
pub fn substitute_command(template: &[String], params: &ParamMap) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            let mut out = arg.clone();
            for (name, value) in params.iter_scalars() {
                out = out.replace(&format!("{{{name}}}"), &value.to_string());
            }
            out
        })
        .collect()
}

/// Export the canary environment: parameter values, identity, resource
/// assignment, and session locations.
fn apply_env(
    command: &mut Command,
    case: &Case,
    reservation: &Reservation,
    ctx: &ExecContext,
) {
    for (name, value) in case.params.iter_scalars() {
        command.env(param_env_name(name), value.to_string());
    }
    for (name, slot) in case.params.iter() {
        if let canary_core::value::ParamSlot::Tuple(values) = slot {
            let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            command.env(param_env_name(name), joined.join(","));
        }
    }
    command
        .env("CANARY_CASE", &case.name)
        .env("CANARY_WORKDIR", case.workdir(&ctx.session_root))
        .env("CANARY_SESSION_ROOT", &ctx.session_root)
        .env(
            "CANARY_TIMEOUT",
            format!("{}", case.timeout.as_secs_f64()),
        )
        .env("CANARY_CPUS", reservation.cpus.to_string())
        .env("CANARY_GPUS", join_ids(&reservation.gpus))
        .env("CANARY_NODES", join_ids(&reservation.nodes));
    if let Some(stage) = &case.stage {
        command.env("CANARY_STAGE", stage);
    }
    if case.kind == CaseKind::Multi {
        command.env("CANARY_ANALYZE", "1");
    }
}

fn param_env_name(name: &str) -> String {
    format!("CANARY_PARAM_{}", name.to_uppercase())
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
