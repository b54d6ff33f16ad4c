//! Core types for the canary test runner.
//!
//! This crate provides the foundational types used across the runner,
//! including:
//!
//! - [`ParamValue`] / [`ParamMap`] - Sum-typed parameter values and the
//!   ordered name→value map attached to every test case
//! - [`Status`] - Runtime and terminal case statuses
//! - [`ResultPredicate`] - Expected-result constraints carried on
//!   dependency edges
//! - [`ResourceSpec`] - Typed resource requirements (cpus, gpus, nodes)
//! - [`WhenExpr`] - The small expression language used by `when=` guards
//!   and `-k` keyword filters
//! - Timeout/duration parsing ([`timeparse`])
//!
//! # Architecture
//!
//! canary-core sits at the foundation of the runner:
//!
//! ```text
//! canary-core (this crate)
//!    │
//!    └─── canary  (discovery, expansion, scheduling, execution)
//! ```
//!
//! Nothing in this crate performs I/O or owns mutable session state; every
//! type here is a plain value that the engine threads through its pipeline.

pub mod escape;
pub mod expr;
pub mod resource;
pub mod status;
pub mod timeparse;
pub mod value;

// Re-exports for convenience
pub use escape::{escape_component, unescape_component};
pub use expr::{EvalContext, ExprError, WhenExpr};
pub use resource::ResourceSpec;
pub use status::{PredicateError, ResultPredicate, Status};
pub use timeparse::{parse_timeout, TimeParseError};
pub use value::{ParamMap, ParamValue};
