#![forbid(unsafe_code)]
//! mrplan-core: pure data shared by the compiler and its callers.
//!
//! Ids, expressions, file specs, the operator DAG, jobs and the job graph,
//! errors, configuration and stable hashing. No compilation logic lives here.

pub mod config;
pub mod dag;
pub mod error;
pub mod expr;
pub mod file;
pub mod hash;
pub mod id;
pub mod job;
pub mod operator;
pub mod prelude;
pub mod schema;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
