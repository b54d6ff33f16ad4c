//! Canary: a test runner for scientific and HPC applications.
//!
//! Test files declare, through embedded directives, one or more cases
//! parameterized over value tuples, with dependencies, typed resource
//! requirements, keywords, platform/option guards, timeouts, and staged
//! inputs. Canary discovers such files beneath user roots, freezes them
//! into a concrete dependency DAG, stages each case's working directory,
//! and executes the DAG concurrently against a finite cpu/gpu/node pool —
//! either directly, or tiled into batches shipped to a workload manager
//! (Slurm, PBS, Flux) or local subprocesses.
//!
//! # Architecture
//!
//! The pipeline is Discover → Freeze → Populate → Run → Finish, driven by
//! [`session::Session`] and checkpointed under `TestResults/.canary/` so
//! sessions are resumable:
//!
//! ```text
//! discover ──▶ testfile (directive parser) ──▶ generator
//!                                                 │ params (expansion)
//!                                                 ▼
//!                                  graph (freeze: cases + edges)
//!                                                 │
//!                  ┌──────────────────────────────┴─────┐
//!                  ▼ local path                         ▼ batch path
//!        dispatch (ready queue)                batch (partitioner)
//!              │ pool (reservations)                    │
//!              ▼                                        ▼
//!        exec (subprocess, timeout)         schedulers (shell/slurm/pbs/flux)
//! ```
//!
//! One coordinator task owns every piece of mutable scheduling state;
//! workers only run subprocesses and post completion events back.

pub mod batch;
pub mod case;
pub mod config;
pub mod discover;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod generator;
pub mod graph;
pub mod hooks;
pub mod params;
pub mod pool;
pub mod report;
pub mod retry;
pub mod schedulers;
pub mod session;
pub mod stage;
pub mod testfile;
pub mod testing;

// Re-exports for convenience
pub use canary_core::{ParamMap, ParamValue, ResourceSpec, ResultPredicate, Status, WhenExpr};

pub use case::{Case, CaseId, CaseKind};
pub use config::{Phase, SessionConfig};
pub use error::{ConfigError, InvariantViolation};
pub use generator::Generator;
pub use graph::CaseGraph;
pub use session::Session;
