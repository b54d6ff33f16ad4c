//! The outer (batch-level) queue.
//!
//! Treats each batch as a super-case: its dependencies are the union of
//! its members' cross-batch edges, its status is the worst of its
//! members', and submission concurrency is bounded by the batch `workers`
//! setting. Submit and poll failures are transient up to the retry limit;
//! past it the batch's cases fail with reason "scheduler error".

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use canary_core::Status;

use crate::batch::{batch_dependencies, Batch};
use crate::config::BatchConfig;
use crate::graph::CaseGraph;
use crate::retry::RetryPolicy;
use crate::schedulers::{
    write_submit_script, CaseRecord, PollState, SchedulerDriver, SubmitHandle,
};

use super::state::{self, SessionPaths};

/// How often submitted batches are polled.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum BatchState {
    Waiting,
    Submitted { handle: SubmitHandle, poll_failures: u32 },
    Finished,
}

/// Run every batch to completion, streaming case statuses back into the
/// graph.
pub async fn run_batched(
    graph: &mut CaseGraph,
    batches: &[Batch],
    config: &BatchConfig,
    driver: &dyn SchedulerDriver,
    paths: &SessionPaths,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut deps = batch_dependencies(graph, batches);
    let mut states: Vec<BatchState> =
        batches.iter().map(|_| BatchState::Waiting).collect();

    for batch in batches {
        let dir = state::write_batch_record(paths, batch)?;
        write_submit_script(driver, batch, paths.root(), &dir)?;
    }

    loop {
        if cancel.is_cancelled() {
            cancel_in_flight(graph, batches, &mut states, driver).await;
            return Ok(());
        }

        let finished: Vec<bool> = states
            .iter()
            .map(|s| matches!(s, BatchState::Finished))
            .collect();
        if finished.iter().all(|&f| f) {
            return Ok(());
        }

        // Submit every batch whose dependencies are done, up to the
        // concurrency bound.
        let mut submitted_count = states
            .iter()
            .filter(|s| matches!(s, BatchState::Submitted { .. }))
            .count();
        let mut progressed = false;
        for batch in batches {
            if submitted_count >= config.workers {
                break;
            }
            if !matches!(states[batch.id], BatchState::Waiting) {
                continue;
            }
            if !deps[batch.id].iter().all(|&d| finished[d]) {
                continue;
            }
            progressed = true;
            submitted_count += 1;
            match submit_batch(batch, driver, paths, &retry).await {
                Ok(handle) => {
                    tracing::info!(batch = batch.id, id = %handle.id, "batch submitted");
                    states[batch.id] = BatchState::Submitted {
                        handle,
                        poll_failures: 0,
                    };
                }
                Err(e) => {
                    tracing::error!(batch = batch.id, error = %e, "batch submit failed");
                    fail_batch(graph, batch, "scheduler error", paths);
                    states[batch.id] = BatchState::Finished;
                }
            }
        }

        let any_submitted = states
            .iter()
            .any(|s| matches!(s, BatchState::Submitted { .. }));
        if !any_submitted && !progressed {
            // Cross-group layouts can, in degenerate configurations, leave
            // batches waiting on each other. Force the lowest waiting
            // batch through rather than stall the session.
            if let Some(stuck) = states
                .iter()
                .position(|s| matches!(s, BatchState::Waiting))
            {
                tracing::warn!(batch = stuck, "breaking batch-order stall");
                deps[stuck].clear();
                continue;
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
        poll_submitted(graph, batches, &mut states, driver, paths, &retry).await;
    }
}

async fn submit_batch(
    batch: &Batch,
    driver: &dyn SchedulerDriver,
    paths: &SessionPaths,
    retry: &RetryPolicy,
) -> anyhow::Result<SubmitHandle> {
    let script = paths.batch_dir(batch.id).join("submit.sh");
    retry
        .run("batch submit", |_| true, || driver.submit(&script))
        .await
}

async fn poll_submitted(
    graph: &mut CaseGraph,
    batches: &[Batch],
    states: &mut [BatchState],
    driver: &dyn SchedulerDriver,
    paths: &SessionPaths,
    retry: &RetryPolicy,
) {
    for batch in batches {
        let BatchState::Submitted {
            handle,
            poll_failures,
        } = &mut states[batch.id]
        else {
            continue;
        };
        match driver.poll(handle).await {
            Ok(PollState::Queued) | Ok(PollState::Running) => {
                *poll_failures = 0;
            }
            Ok(PollState::Done(exit)) => {
                tracing::info!(batch = batch.id, exit, "batch finished");
                harvest_batch(graph, batch, driver, paths).await;
                states[batch.id] = BatchState::Finished;
            }
            Err(e) => {
                *poll_failures += 1;
                if *poll_failures > retry.limit {
                    tracing::error!(batch = batch.id, error = %e, "batch poll failed");
                    let _ = driver.cancel(handle).await;
                    fail_batch(graph, batch, "scheduler error", paths);
                    states[batch.id] = BatchState::Finished;
                } else {
                    tracing::warn!(
                        batch = batch.id,
                        error = %e,
                        attempt = *poll_failures,
                        "batch poll failed transiently"
                    );
                }
            }
        }
    }
}

/// Stream a finished batch's records into the graph. Missing artifacts
/// fail the batch's unfinished cases.
async fn harvest_batch(
    graph: &mut CaseGraph,
    batch: &Batch,
    driver: &dyn SchedulerDriver,
    paths: &SessionPaths,
) {
    let records = match driver.fetch_artifacts(&paths.batch_dir(batch.id)).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(batch = batch.id, error = %e, "no batch artifacts");
            fail_batch(graph, batch, "scheduler error", paths);
            return;
        }
    };
    let by_name: HashMap<&str, &CaseRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();
    for &id in &batch.cases {
        let case = graph.case_mut(id);
        match by_name.get(case.name.as_str()) {
            Some(record) => {
                case.state.status = Some(record.status);
                case.state.reason = record.reason.clone();
                case.state.exit_code = record.exit_code;
            }
            None if case.terminal_status().is_none() => {
                case.state.status = Some(Status::Fail);
                case.state.reason =
                    Some("scheduler error: no record for case".to_string());
            }
            None => {}
        }
    }
}

/// Worst-wins: mark every unfinished case of the batch failed, and
/// persist the statuses so later batches (which reload the graph from
/// locks inside their allocations) see the failure.
fn fail_batch(graph: &mut CaseGraph, batch: &Batch, reason: &str, paths: &SessionPaths) {
    for &id in &batch.cases {
        let case = graph.case_mut(id);
        if case.terminal_status().is_none() {
            case.state.status = Some(Status::Fail);
            case.state.reason = Some(reason.to_string());
        }
        if let Err(e) = state::write_lock(paths, graph, id) {
            tracing::warn!(error = %e, "cannot persist failed batch case");
        }
    }
}

async fn cancel_in_flight(
    graph: &mut CaseGraph,
    batches: &[Batch],
    states: &mut [BatchState],
    driver: &dyn SchedulerDriver,
) {
    for batch in batches {
        match &states[batch.id] {
            BatchState::Submitted { handle, .. } => {
                if let Err(e) = driver.cancel(handle).await {
                    tracing::warn!(batch = batch.id, error = %e, "batch cancel failed");
                }
            }
            BatchState::Waiting | BatchState::Finished => {}
        }
        for &id in &batch.cases {
            let case = graph.case_mut(id);
            if case.terminal_status().is_none() {
                case.state.status = Some(Status::NotRun);
                case.state.reason = Some("session cancelled".to_string());
            }
        }
    }
}

/// The super-case status of one batch: the worst of its members'.
pub fn batch_status(graph: &CaseGraph, batch: &Batch) -> Status {
    Status::aggregate(
        batch
            .cases
            .iter()
            .filter_map(|&id| graph.case(id).terminal_status()),
    )
}
