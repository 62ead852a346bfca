#![forbid(unsafe_code)]
//! mrplan-planner: operator DAG → two-phase job graph.
//!
//! Design:
//! - Input and job sub-plans share `mrplan_core::dag::OperatorPlan`.
//! - `compiler` walks the input predecessor-first and places every operator
//!   into the open stage of some job, opening shuffle boundaries and bridging
//!   jobs through temp files as needed.
//! - Strategy lowering (joins, order-by, distinct, limit) lives in its own
//!   modules as further `impl JobBuilder` blocks.
//! - `rules` holds the post-passes, `verify` the structural checks run on
//!   every compiled graph.
//! - A small YAML DSL (`dsl`) builds input plans for the CLI and tests.

pub mod capability;
pub mod compiler;
pub mod distinct;
pub mod dsl;
pub mod explain;
pub mod join;
pub mod limit;
pub mod logical;
pub mod merge;
pub mod physical;
pub mod rules;
pub mod sampling;
pub mod session;
pub mod sort;
pub mod stage;
pub mod verify;

pub use capability::{
    Collaborators, FixedFanout, LoaderCapabilities, PartitionCounter, RequestedOrDefault,
    StaticCapabilities,
};
pub use compiler::{compile, JobBuilder};
pub use dsl::yaml::{parse_yaml_plan, ParsedPlan, PlanConfig};
pub use explain::explain;
pub use logical::{LogicalPlan, PlanBuilder};
pub use physical::Compiled;
pub use session::Session;
