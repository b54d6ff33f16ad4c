//! Typed resource requirements.
//!
//! Every case declares how many cpus, gpus, and whole nodes it needs; the
//! pool and the batch partitioner both work in these units. Node counts
//! round up to whole nodes, and a request is validated against pool
//! *capacity* (not just free counts) at freeze time so an infeasible case
//! fails the session instead of deadlocking it.

use serde::{Deserialize, Serialize};

/// Resource requirement of one case (or the summed requirement of a batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Total cpu cores
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    /// Total gpu devices
    #[serde(default)]
    pub gpus: u32,
    /// Whole nodes; 0 means "fits anywhere"
    #[serde(default)]
    pub nodes: u32,
}

fn default_cpus() -> u32 {
    1
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpus: 1,
            gpus: 0,
            nodes: 0,
        }
    }
}

impl ResourceSpec {
    /// A requirement of `cpus` cores and nothing else.
    pub fn cpus(cpus: u32) -> Self {
        Self {
            cpus,
            ..Self::default()
        }
    }

    /// Whether this requirement can ever be satisfied by `capacity`.
    pub fn fits_within(&self, capacity: &ResourceSpec) -> bool {
        self.cpus <= capacity.cpus && self.gpus <= capacity.gpus && self.nodes <= capacity.nodes
    }

    /// Component-wise sum, used when a batch aggregates its cases.
    pub fn saturating_add(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpus: self.cpus.saturating_add(other.cpus),
            gpus: self.gpus.saturating_add(other.gpus),
            nodes: self.nodes.saturating_add(other.nodes),
        }
    }

    /// Component-wise max, used for the per-node requirement of a batch.
    pub fn max(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpus: self.cpus.max(other.cpus),
            gpus: self.gpus.max(other.gpus),
            nodes: self.nodes.max(other.nodes),
        }
    }

    /// Scheduling footprint: larger cases are dispatched first so the
    /// ready queue bin-packs big reservations before small ones. Nodes
    /// dominate cpus.
    pub fn footprint(&self) -> u64 {
        const NODE_PENALTY: u64 = 1024;
        u64::from(self.cpus) + u64::from(self.nodes) * NODE_PENALTY
    }
}
