//! Batch partitioning ("tiling").
//!
//! Groups frozen cases into batches for submission to a workload manager,
//! under a policy (target duration or bin count), a layout (`flat`: no
//! intra-batch dependency edges; `atomic`: every intra-group dependency
//! stays inside one batch), and a node grouping (`same`: only cases with
//! equal node counts share a batch).
//!
//! Packing is deterministic: durations decide bin choice, and every tie
//! breaks on arena id.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canary_core::ResourceSpec;

use crate::case::CaseId;
use crate::graph::CaseGraph;

/// How many batches / how big.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum BatchPolicy {
    /// Greedy first-fit-decreasing under a summed-duration target
    Duration(#[serde(with = "secs")] Duration),
    /// Longest-processing-time onto exactly this many bins
    Count(usize),
    /// One case per batch
    CountMax,
    /// `min(workers, cases)` bins
    CountAuto,
}

/// Dependency placement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchLayout {
    /// No dependency edge may join two cases of the same batch
    Flat,
    /// Dependency-connected cases are merged into one batch, even past
    /// the duration target
    Atomic,
}

/// Node-count grouping rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGrouping {
    /// Any mix of node counts in a batch
    Any,
    /// Only cases with the same node count share a batch
    Same,
}

/// Complete batching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    /// Sizing policy
    pub policy: BatchPolicy,
    /// Dependency layout
    pub layout: BatchLayout,
    /// Node grouping
    pub nodes: NodeGrouping,
}

impl Default for BatchSpec {
    fn default() -> Self {
        Self {
            policy: BatchPolicy::Duration(Duration::from_secs(1800)),
            layout: BatchLayout::Atomic,
            nodes: NodeGrouping::Any,
        }
    }
}

/// One tiled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Dense id, assigned in order of each batch's smallest case id
    pub id: usize,
    /// Member cases, ascending by arena id
    pub cases: Vec<CaseId>,
    /// Summed resource requirement the outer queue reserves
    pub resources: ResourceSpec,
    /// Summed duration estimate
    pub duration: Duration,
}

/// Tile `candidates` into batches.
///
/// `estimates` carries per-case duration predictions (from prior runs);
/// a case missing from it falls back to its declared timeout.
pub fn partition(
    graph: &CaseGraph,
    candidates: &[CaseId],
    estimates: &HashMap<CaseId, Duration>,
    spec: &BatchSpec,
    workers: usize,
) -> Vec<Batch> {
    let estimate =
        |id: CaseId| -> Duration { *estimates.get(&id).unwrap_or(&graph.case(id).timeout) };

    // Node grouping first; each group packs independently.
    let mut groups: Vec<(u32, Vec<CaseId>)> = Vec::new();
    match spec.nodes {
        NodeGrouping::Any => groups.push((0, candidates.to_vec())),
        NodeGrouping::Same => {
            let mut by_nodes: HashMap<u32, Vec<CaseId>> = HashMap::new();
            for &id in candidates {
                by_nodes.entry(graph.case(id).resources.nodes).or_default().push(id);
            }
            let mut keys: Vec<u32> = by_nodes.keys().copied().collect();
            keys.sort_unstable();
            for k in keys {
                if let Some(group) = by_nodes.remove(&k) {
                    groups.push((k, group));
                }
            }
        }
    }

    let mut bins: Vec<Vec<CaseId>> = Vec::new();
    for (_, mut group) in groups {
        // Descending estimate, id tie-break; this is the FFD/LPT ordering.
        group.sort_by_key(|&id| (std::cmp::Reverse(estimate(id)), id.0));
        let group_bins = match spec.policy {
            BatchPolicy::Duration(target) => {
                pack_duration(graph, &group, &estimate, target, spec.layout)
            }
            BatchPolicy::CountMax => group.iter().map(|&id| vec![id]).collect(),
            BatchPolicy::Count(n) => pack_count(graph, &group, &estimate, n, spec.layout),
            BatchPolicy::CountAuto => {
                let n = workers.clamp(1, group.len().max(1));
                pack_count(graph, &group, &estimate, n, spec.layout)
            }
        };
        bins.extend(group_bins);
    }

    if spec.layout == BatchLayout::Atomic {
        merge_atomic(graph, &mut bins);
    }

    finalize(graph, bins, &estimate)
}

/// First-fit-decreasing against a duration target.
fn pack_duration(
    graph: &CaseGraph,
    ordered: &[CaseId],
    estimate: &dyn Fn(CaseId) -> Duration,
    target: Duration,
    layout: BatchLayout,
) -> Vec<Vec<CaseId>> {
    if layout == BatchLayout::Flat {
        return pack_flat(graph, ordered, estimate, FlatSizing::Target(target));
    }
    let mut bins: Vec<Vec<CaseId>> = Vec::new();
    let mut loads: Vec<Duration> = Vec::new();
    for &id in ordered {
        let d = estimate(id);
        match (0..bins.len()).find(|&i| loads[i] + d <= target) {
            Some(i) => {
                bins[i].push(id);
                loads[i] += d;
            }
            None => {
                bins.push(vec![id]);
                loads.push(d);
            }
        }
    }
    bins
}

/// Longest-processing-time onto `n` bins: each case lands in the least
/// loaded bin.
fn pack_count(
    graph: &CaseGraph,
    ordered: &[CaseId],
    estimate: &dyn Fn(CaseId) -> Duration,
    n: usize,
    layout: BatchLayout,
) -> Vec<Vec<CaseId>> {
    let n = n.max(1);
    if layout == BatchLayout::Flat {
        return pack_flat(graph, ordered, estimate, FlatSizing::Bins(n));
    }
    let mut bins: Vec<Vec<CaseId>> = vec![Vec::new(); n];
    let mut loads: Vec<Duration> = vec![Duration::ZERO; n];
    for &id in ordered {
        let i = (0..bins.len()).min_by_key(|&i| (loads[i], i)).unwrap_or(0);
        loads[i] += estimate(id);
        bins[i].push(id);
    }
    bins.retain(|b| !b.is_empty());
    bins
}

/// Sizing rule for flat packing.
#[derive(Clone, Copy)]
enum FlatSizing {
    /// Duration target per bin
    Target(Duration),
    /// Fixed starting bin count
    Bins(usize),
}

/// Flat packing places cases in topological order and forces every case
/// into a strictly later bin than all of its placed dependencies. That
/// both keeps dependency edges out of individual bins and keeps the
/// batch-level dependency graph acyclic, so the outer queue can always
/// make progress.
fn pack_flat(
    graph: &CaseGraph,
    group: &[CaseId],
    estimate: &dyn Fn(CaseId) -> Duration,
    sizing: FlatSizing,
) -> Vec<Vec<CaseId>> {
    let mut order: Vec<CaseId> = group.to_vec();
    order.sort_by_key(|&id| {
        (
            graph.topo_rank[id.0],
            std::cmp::Reverse(estimate(id)),
            id.0,
        )
    });

    let mut bins: Vec<Vec<CaseId>> = Vec::new();
    let mut loads: Vec<Duration> = Vec::new();
    if let FlatSizing::Bins(n) = sizing {
        bins.resize(n, Vec::new());
        loads.resize(n, Duration::ZERO);
    }

    let mut placed: HashMap<CaseId, usize> = HashMap::new();
    for &id in &order {
        let d = estimate(id);
        // Dependencies outside this group (other node-count groups,
        // already-finished cases) do not constrain placement.
        let min_bin = graph
            .case(id)
            .dependencies
            .iter()
            .filter_map(|e| placed.get(&e.dep))
            .map(|&b| b + 1)
            .max()
            .unwrap_or(0);
        let choice = match sizing {
            FlatSizing::Target(target) => {
                (min_bin..bins.len()).find(|&i| loads[i] + d <= target)
            }
            FlatSizing::Bins(_) => (min_bin..bins.len()).min_by_key(|&i| (loads[i], i)),
        };
        let i = match choice {
            Some(i) => i,
            None => {
                bins.push(Vec::new());
                loads.push(Duration::ZERO);
                bins.len() - 1
            }
        };
        bins[i].push(id);
        loads[i] += d;
        placed.insert(id, i);
    }
    bins.retain(|b| !b.is_empty());
    bins
}

/// Union-find merge: every dependency edge between two bins collapses
/// them into one. Atomicity wins over the duration target.
fn merge_atomic(graph: &CaseGraph, bins: &mut Vec<Vec<CaseId>>) {
    let mut owner: HashMap<CaseId, usize> = HashMap::new();
    for (i, bin) in bins.iter().enumerate() {
        for &id in bin {
            owner.insert(id, i);
        }
    }

    let mut parent: Vec<usize> = (0..bins.len()).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for bin in bins.iter() {
        for &id in bin {
            for edge in &graph.case(id).dependencies {
                if let Some(&dep_bin) = owner.get(&edge.dep) {
                    let a = find(&mut parent, owner[&id]);
                    let b = find(&mut parent, dep_bin);
                    if a != b {
                        // Deterministic: the smaller root absorbs.
                        parent[a.max(b)] = a.min(b);
                    }
                }
            }
        }
    }

    let old = std::mem::take(bins);
    let mut merged: HashMap<usize, Vec<CaseId>> = HashMap::new();
    for (i, bin) in old.into_iter().enumerate() {
        merged.entry(find(&mut parent, i)).or_default().extend(bin);
    }
    let mut roots: Vec<usize> = merged.keys().copied().collect();
    roots.sort_unstable();
    for root in roots {
        if let Some(bin) = merged.remove(&root) {
            bins.push(bin);
        }
    }
}

/// Sort members, order batches by smallest member id, assign dense ids,
/// and sum resources and durations.
fn finalize(
    graph: &CaseGraph,
    mut bins: Vec<Vec<CaseId>>,
    estimate: &dyn Fn(CaseId) -> Duration,
) -> Vec<Batch> {
    bins.retain(|b| !b.is_empty());
    for bin in &mut bins {
        bin.sort_unstable();
    }
    bins.sort_by_key(|b| b[0]);

    bins.into_iter()
        .enumerate()
        .map(|(id, cases)| {
            let mut resources = ResourceSpec {
                cpus: 0,
                gpus: 0,
                nodes: 0,
            };
            let mut duration = Duration::ZERO;
            for &c in &cases {
                let case = graph.case(c);
                duration += estimate(c);
                resources.cpus += case.resources.cpus;
                resources.gpus += case.resources.gpus;
                // Cases inside a batch share the allocation; the batch
                // needs as many nodes as its widest case.
                resources.nodes = resources.nodes.max(case.resources.nodes);
            }
            Batch {
                id,
                cases,
                resources,
                duration,
            }
        })
        .collect()
}

/// Cross-batch dependency edges: `deps[i]` lists the batches that must
/// finish before batch `i` may be submitted.
pub fn batch_dependencies(graph: &CaseGraph, batches: &[Batch]) -> Vec<Vec<usize>> {
    let mut owner: HashMap<CaseId, usize> = HashMap::new();
    for batch in batches {
        for &id in &batch.cases {
            owner.insert(id, batch.id);
        }
    }
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); batches.len()];
    for batch in batches {
        for &id in &batch.cases {
            for edge in &graph.case(id).dependencies {
                if let Some(&dep_batch) = owner.get(&edge.dep) {
                    if dep_batch != batch.id && !deps[batch.id].contains(&dep_batch) {
                        deps[batch.id].push(dep_batch);
                    }
                }
            }
        }
        deps[batch.id].sort_unstable();
    }
    deps
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
