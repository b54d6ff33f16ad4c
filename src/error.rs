//! Engine error taxonomy.
//!
//! Only two classes abort a session: configuration errors raised while
//! freezing the case graph, and internal invariant violations. Everything
//! else (staging failures, subprocess exits, scheduler hiccups) is local to
//! a case or batch and surfaces as that case's terminal status.

use std::path::PathBuf;

use thiserror::Error;

use canary_core::ResourceSpec;

/// Fatal configuration error detected at freeze time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Dependency cycle among the named cases
    #[error("dependency cycle among cases: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A case asks for more than the pool will ever have
    #[error(
        "case '{case}' requires {required:?} but the pool capacity is {capacity:?}; \
         it can never run"
    )]
    InfeasibleResources {
        /// Canonical case name
        case: String,
        /// What the case asked for
        required: ResourceSpec,
        /// What the pool has in total
        capacity: ResourceSpec,
    },

    /// `expect=` cardinality violated by dependency resolution
    #[error(
        "dependency '{pattern}' of case '{case}' matched {matched} case(s), \
         expected {expected}"
    )]
    DependencyCardinality {
        /// Dependent case
        case: String,
        /// The symbolic predicate
        pattern: String,
        /// How many cases matched
        matched: usize,
        /// The declared expectation (`?`, `+`, `*`, or a count)
        expected: String,
    },

    /// Malformed directive content in a test file
    #[error("{path}: {message}")]
    BadDirective {
        /// Offending test file
        path: PathBuf,
        /// What was wrong
        message: String,
    },

    /// Scheduler name with no registered driver
    #[error("unknown scheduler '{0}' (expected shell, slurm, pbs, or flux)")]
    UnknownScheduler(String),

    /// Malformed `-b key=value` batch option
    #[error("invalid batch option '{0}': {1}")]
    BadBatchOption(String, String),
}

/// Internal invariant violation. Always fatal; the session persists what it
/// can and aborts.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    /// The dispatcher found pending cases, an idle pool, and nothing
    /// running. Freeze-time feasibility checks should make this
    /// unreachable.
    #[error(
        "scheduler deadlock: {pending} pending case(s) with nothing running \
         and no reservable case; freeze-time feasibility was violated"
    )]
    ResourceDeadlock {
        /// Number of stranded cases
        pending: usize,
    },

    /// A completion event arrived for a case the dispatcher does not own
    #[error("completion event for unknown or not-running case id {0}")]
    UnknownCompletion(usize),
}
