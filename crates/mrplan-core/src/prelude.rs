//! Convenient re-exports for downstream crates.

pub use crate::config::CompilerConfig;
pub use crate::dag::OperatorPlan;
pub use crate::error::{Error, ErrorKind, Result, Warning};
pub use crate::expr::Expr;
pub use crate::file::{FileSpec, FuncSpec, TempAllocator};
pub use crate::id::{IdGen, JobId, OpId};
pub use crate::job::{Job, JobGraph};
pub use crate::operator::{MergeJoinRight, OpKind, Operator, Projection, RearrangeMode, SortKey};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::Scalar;
