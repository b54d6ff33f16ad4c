//! The ready queue and dispatch loop.
//!
//! One coordinator owns every piece of mutable scheduling state: the
//! pending/running/finished sets, the case arena, and the resource pool.
//! Workers are spawned tasks that run a single case and post a completion
//! event back over a channel; they touch nothing else. This keeps the
//! shared-state surface to exactly one region, per the session's
//! single-coordinator concurrency model.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;

use canary_core::Status;

use crate::case::CaseId;
use crate::error::InvariantViolation;
use crate::exec::{CaseOutcome, CaseRunner, ExecContext};
use crate::graph::CaseGraph;
use crate::hooks::HookRegistry;
use crate::pool::{Reservation, ResourcePool};

/// Posted by a worker when its case reaches a terminal status.
#[derive(Debug)]
pub struct CompletionEvent {
    /// Which case finished
    pub id: CaseId,
    /// How it finished
    pub outcome: CaseOutcome,
}

/// Bounds on the dispatch loop.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Maximum concurrently running cases; resource availability is the
    /// only bound when `None`
    pub max_workers: Option<usize>,
}

/// Run every non-terminal case in `subset` (or the whole graph) to a
/// terminal status, respecting dependencies and the resource pool.
///
/// On return, every selected case has a terminal status recorded in the
/// arena. The only error is an internal invariant violation; ordinary
/// case failures are statuses, not errors.
#[allow(clippy::too_many_arguments)]
pub async fn run_cases(
    graph: &mut CaseGraph,
    pool: &mut ResourcePool,
    runner: Arc<dyn CaseRunner>,
    ctx: &ExecContext,
    subset: Option<&[CaseId]>,
    opts: &DispatchOptions,
    hooks: &HookRegistry,
) -> Result<(), InvariantViolation> {
    let selected: Vec<CaseId> = match subset {
        Some(ids) => ids.to_vec(),
        None => graph.ids().collect(),
    };

    let mut pending: BTreeSet<CaseId> = BTreeSet::new();
    let mut finished: HashMap<CaseId, Status> = HashMap::new();
    // Terminal statuses of cases outside the subset still gate dependents.
    for id in graph.ids() {
        if let Some(status) = graph.case(id).terminal_status() {
            finished.insert(id, status);
        }
    }
    for &id in &selected {
        if !finished.contains_key(&id) {
            pending.insert(id);
        }
    }

    let mut running: HashMap<CaseId, Reservation> = HashMap::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<CompletionEvent>();

    loop {
        propagate_violations(graph, &mut pending, &mut finished);

        if ctx.cancel.is_cancelled() {
            cancel_pending(graph, &mut pending, &mut finished);
        } else {
            let dispatched = dispatch_pass(
                graph, pool, &runner, ctx, &mut pending, &finished, &running, &tx, opts, hooks,
            );
            for (id, reservation) in dispatched {
                running.insert(id, reservation);
            }
        }

        if pending.is_empty() && running.is_empty() {
            break;
        }

        if running.is_empty() && !pending.is_empty() {
            // Every remaining case is blocked on resources that will never
            // free up. Freeze-time feasibility makes this unreachable.
            return Err(InvariantViolation::ResourceDeadlock {
                pending: pending.len(),
            });
        }

        // At least one worker is out; wait for a completion.
        let event = match rx.recv().await {
            Some(event) => event,
            None => unreachable!("coordinator holds a sender"),
        };
        let Some(reservation) = running.remove(&event.id) else {
            return Err(InvariantViolation::UnknownCompletion(event.id.0));
        };
        pool.release(&reservation);
        record_outcome(graph, &mut finished, event);
    }

    Ok(())
}

/// One dispatch pass: reserve and launch as many ready cases as the pool
/// and worker bound allow, in priority order. Returns the launched
/// reservations.
#[allow(clippy::too_many_arguments)]
fn dispatch_pass(
    graph: &CaseGraph,
    pool: &mut ResourcePool,
    runner: &Arc<dyn CaseRunner>,
    ctx: &ExecContext,
    pending: &mut BTreeSet<CaseId>,
    finished: &HashMap<CaseId, Status>,
    running: &HashMap<CaseId, Reservation>,
    tx: &mpsc::UnboundedSender<CompletionEvent>,
    opts: &DispatchOptions,
    hooks: &HookRegistry,
) -> Vec<(CaseId, Reservation)> {
    let runnable = select_runnable(graph, pending, finished);
    let mut launched = Vec::new();
    let mut slots = opts
        .max_workers
        .map(|max| max.saturating_sub(running.len()))
        .unwrap_or(usize::MAX);

    for id in runnable {
        if slots == 0 {
            break;
        }
        let case = graph.case(id);
        let Some(reservation) = pool.try_reserve(&case.resources) else {
            continue;
        };
        slots -= 1;
        pending.remove(&id);
        tracing::debug!(case = %case.name, "dispatching");
        hooks.test_prelaunch(case);

        let worker_case = case.clone();
        let worker_reservation = reservation.clone();
        let worker_runner = Arc::clone(runner);
        let worker_ctx = ctx.clone();
        let worker_tx = tx.clone();
        tokio::spawn(async move {
            let outcome = worker_runner
                .run(&worker_case, &worker_reservation, &worker_ctx)
                .await;
            let _ = worker_tx.send(CompletionEvent {
                id: worker_case.id,
                outcome,
            });
        });
        launched.push((id, reservation));
    }
    launched
}

/// The ready cases of `pending`, ordered for dispatch: biggest resource
/// footprint first (pack large reservations before small ones can
/// fragment the pool), then topological rank, then arena id. The order is
/// stable across reruns of the same frozen graph.
pub fn select_runnable(
    graph: &CaseGraph,
    pending: &BTreeSet<CaseId>,
    finished: &HashMap<CaseId, Status>,
) -> Vec<CaseId> {
    let mut runnable: Vec<CaseId> = pending
        .iter()
        .copied()
        .filter(|&id| graph.case(id).ready(finished))
        .collect();
    runnable.sort_by_key(|&id| {
        (
            std::cmp::Reverse(graph.case(id).resources.footprint()),
            graph.topo_rank[id.0],
            id.0,
        )
    });
    runnable
}

/// Move every pending case with a predicate-violating finished dependency
/// to `NotRun`, iterating to a fixpoint since `NotRun` itself violates
/// downstream `pass` edges.
fn propagate_violations(
    graph: &mut CaseGraph,
    pending: &mut BTreeSet<CaseId>,
    finished: &mut HashMap<CaseId, Status>,
) {
    loop {
        let mut gated: Vec<(CaseId, CaseId, Status)> = Vec::new();
        for &id in pending.iter() {
            if let Some((dep, status)) = graph.case(id).violated_dependency(finished) {
                gated.push((id, dep, status));
            }
        }
        if gated.is_empty() {
            return;
        }
        for (id, dep, status) in gated {
            pending.remove(&id);
            let dep_name = graph.case(dep).name.clone();
            let case = graph.case_mut(id);
            case.state.status = Some(Status::NotRun);
            case.state.reason = Some(format!(
                "dependency failed: '{dep_name}' finished {status}"
            ));
            finished.insert(id, Status::NotRun);
            tracing::info!(case = %graph.case(id).name, dep = %dep_name, "dependency failed");
        }
    }
}

/// Mark every still-pending case `NotRun` after a session cancel.
fn cancel_pending(
    graph: &mut CaseGraph,
    pending: &mut BTreeSet<CaseId>,
    finished: &mut HashMap<CaseId, Status>,
) {
    for id in std::mem::take(pending) {
        let case = graph.case_mut(id);
        case.state.status = Some(Status::NotRun);
        case.state.reason = Some("session cancelled".to_string());
        finished.insert(id, Status::NotRun);
    }
}

fn record_outcome(
    graph: &mut CaseGraph,
    finished: &mut HashMap<CaseId, Status>,
    event: CompletionEvent,
) {
    let case = graph.case_mut(event.id);
    case.state.status = Some(event.outcome.status);
    case.state.reason = event.outcome.reason;
    case.state.exit_code = event.outcome.exit_code;
    case.state.started = Some(event.outcome.started);
    case.state.finished = Some(event.outcome.finished);
    finished.insert(event.id, event.outcome.status);
    tracing::info!(
        case = %graph.case(event.id).name,
        status = %event.outcome.status,
        "case finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{DepDecl, Generator};
    use crate::graph::{freeze, FreezeOptions};
    use canary_core::ResourceSpec;

    fn graph_of(generators: &[Generator]) -> CaseGraph {
        freeze(generators, &FreezeOptions::default()).unwrap()
    }

    #[test]
    fn runnable_excludes_blocked_cases() {
        let mut b = Generator::new("b", vec!["./run".into()]);
        b.dependencies = vec![DepDecl::on_pattern("a")];
        let a = Generator::new("a", vec!["./run".into()]);
        let graph = graph_of(&[a, b]);

        let pending: BTreeSet<CaseId> = graph.ids().collect();
        let finished = HashMap::new();
        let runnable = select_runnable(&graph, &pending, &finished);
        let names: Vec<&str> = runnable
            .iter()
            .map(|&id| graph.case(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn runnable_orders_large_footprints_first() {
        let mut small = Generator::new("small", vec!["./run".into()]);
        small.resources = ResourceSpec::cpus(1);
        let mut big = Generator::new("big", vec!["./run".into()]);
        big.resources = ResourceSpec::cpus(16);
        let graph = graph_of(&[small, big]);

        let pending: BTreeSet<CaseId> = graph.ids().collect();
        let runnable = select_runnable(&graph, &pending, &HashMap::new());
        let names: Vec<&str> = runnable
            .iter()
            .map(|&id| graph.case(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["big", "small"]);
    }
}
