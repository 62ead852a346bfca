//! Strongly-typed identifiers used across the compiler.
//!
//! Downstream crates should *not* use raw integers for IDs. Fresh ids come
//! from a per-compilation [`IdGen`]; there is no process-wide counter.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(OpId);
new_id!(JobId);

/// Monotonic id source scoped to one compilation.
///
/// Seed it above the largest id of the input plan so synthesized operators
/// never collide with user operators.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    next_op: u64,
    next_job: u64,
}

impl IdGen {
    pub fn starting_after(max_op: Option<OpId>) -> Self {
        Self {
            next_op: max_op.map(|id| id.get() + 1).unwrap_or(0),
            next_job: 0,
        }
    }

    pub fn op(&mut self) -> OpId {
        let id = OpId::new(self.next_op);
        self.next_op += 1;
        id
    }

    pub fn job(&mut self) -> JobId {
        let id = JobId::new(self.next_job);
        self.next_job += 1;
        id
    }
}
