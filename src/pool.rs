//! The typed resource pool.
//!
//! One pool per session (or per batch allocation), owned by the scheduler
//! coordinator; nothing else mutates it. Reservations are all-or-nothing
//! across types and release is idempotent, so a worker error path that
//! releases twice cannot corrupt the accounting.
//!
//! Gpus and nodes are tracked as index sets rather than bare counts: the
//! executor exports the concrete device indices and node ids to the
//! subprocess environment.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use canary_core::ResourceSpec;

/// A granted claim on pool resources. Returned by [`ResourcePool::try_reserve`]
/// and handed back via [`ResourcePool::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Unique id within this pool, for idempotent release
    pub id: u64,
    /// Reserved cpu count
    pub cpus: u32,
    /// Reserved gpu device indices
    pub gpus: Vec<u32>,
    /// Reserved node ids
    pub nodes: Vec<u32>,
}

/// Snapshot of totals and free counts, for diagnostics and the per-batch
/// `resource_pool.json` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Configured totals
    pub capacity: ResourceSpec,
    /// Currently free counts
    pub free: ResourceSpec,
}

/// Counted cpu capacity plus indexed gpu/node sets.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: ResourceSpec,
    free_cpus: u32,
    free_gpus: BTreeSet<u32>,
    free_nodes: BTreeSet<u32>,
    next_id: u64,
    active: HashMap<u64, (u32, Vec<u32>, Vec<u32>)>,
}

impl ResourcePool {
    /// A pool with the given totals. Gpu indices and node ids are numbered
    /// from zero.
    pub fn new(capacity: ResourceSpec) -> Self {
        Self {
            capacity,
            free_cpus: capacity.cpus,
            free_gpus: (0..capacity.gpus).collect(),
            free_nodes: (0..capacity.nodes).collect(),
            next_id: 0,
            active: HashMap::new(),
        }
    }

    /// A single-node pool sized to this host: every hardware thread, no
    /// gpus.
    pub fn local() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self::new(ResourceSpec {
            cpus,
            gpus: 0,
            nodes: 1,
        })
    }

    /// Atomically reserve `spec`, or return `None` leaving the pool
    /// untouched.
    pub fn try_reserve(&mut self, spec: &ResourceSpec) -> Option<Reservation> {
        if spec.cpus > self.free_cpus
            || spec.gpus as usize > self.free_gpus.len()
            || spec.nodes as usize > self.free_nodes.len()
        {
            return None;
        }
        self.free_cpus -= spec.cpus;
        let gpus: Vec<u32> = take_lowest(&mut self.free_gpus, spec.gpus as usize);
        let nodes: Vec<u32> = take_lowest(&mut self.free_nodes, spec.nodes as usize);
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, (spec.cpus, gpus.clone(), nodes.clone()));
        Some(Reservation {
            id,
            cpus: spec.cpus,
            gpus,
            nodes,
        })
    }

    /// Return a reservation's resources. Releasing the same token twice is
    /// a no-op; the double release is logged and ignored.
    pub fn release(&mut self, token: &Reservation) {
        match self.active.remove(&token.id) {
            Some((cpus, gpus, nodes)) => {
                self.free_cpus += cpus;
                self.free_gpus.extend(gpus);
                self.free_nodes.extend(nodes);
            }
            None => {
                tracing::debug!(id = token.id, "ignoring double release of reservation");
            }
        }
    }

    /// Totals and free counts right now.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            capacity: self.capacity,
            free: ResourceSpec {
                cpus: self.free_cpus,
                gpus: self.free_gpus.len() as u32,
                nodes: self.free_nodes.len() as u32,
            },
        }
    }

    /// Configured totals.
    pub fn capacity(&self) -> ResourceSpec {
        self.capacity
    }

    /// Number of reservations currently out.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

fn take_lowest(set: &mut BTreeSet<u32>, n: usize) -> Vec<u32> {
    let taken: Vec<u32> = set.iter().take(n).copied().collect();
    for v in &taken {
        set.remove(v);
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cpus: u32, gpus: u32, nodes: u32) -> ResourceSpec {
        ResourceSpec { cpus, gpus, nodes }
    }

    #[test]
    fn reserve_and_release_round_trip() {
        let mut pool = ResourcePool::new(spec(8, 2, 1));
        let token = pool.try_reserve(&spec(4, 1, 0)).unwrap();
        assert_eq!(pool.snapshot().free, spec(4, 1, 1));
        pool.release(&token);
        assert_eq!(pool.snapshot().free, spec(8, 2, 1));
    }

    #[test]
    fn reservation_is_all_or_nothing() {
        let mut pool = ResourcePool::new(spec(8, 0, 0));
        // Gpus unavailable: nothing (cpus included) may be deducted.
        assert!(pool.try_reserve(&spec(2, 1, 0)).is_none());
        assert_eq!(pool.snapshot().free, spec(8, 0, 0));
    }

    #[test]
    fn denied_when_insufficient_free() {
        let mut pool = ResourcePool::new(spec(4, 0, 0));
        let _a = pool.try_reserve(&spec(3, 0, 0)).unwrap();
        assert!(pool.try_reserve(&spec(3, 0, 0)).is_none());
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut pool = ResourcePool::new(spec(4, 0, 0));
        let token = pool.try_reserve(&spec(4, 0, 0)).unwrap();
        pool.release(&token);
        pool.release(&token);
        assert_eq!(pool.snapshot().free, spec(4, 0, 0));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn gpu_indices_are_concrete_and_disjoint() {
        let mut pool = ResourcePool::new(spec(8, 4, 0));
        let a = pool.try_reserve(&spec(1, 2, 0)).unwrap();
        let b = pool.try_reserve(&spec(1, 2, 0)).unwrap();
        assert_eq!(a.gpus, vec![0, 1]);
        assert_eq!(b.gpus, vec![2, 3]);
        pool.release(&a);
        let c = pool.try_reserve(&spec(1, 1, 0)).unwrap();
        assert_eq!(c.gpus, vec![0]);
    }

    #[test]
    fn sum_of_active_reservations_never_exceeds_capacity() {
        let mut pool = ResourcePool::new(spec(4, 0, 0));
        let mut tokens = Vec::new();
        let mut reserved = 0;
        for _ in 0..10 {
            if let Some(t) = pool.try_reserve(&spec(3, 0, 0)) {
                reserved += t.cpus;
                tokens.push(t);
            }
        }
        assert!(reserved <= 4);
        assert_eq!(tokens.len(), 1);
    }
}
