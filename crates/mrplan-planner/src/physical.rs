//! Compiler output: the job graph plus the warnings collected on the way.

use mrplan_core::error::{Result, Warning};
use mrplan_core::hash::{hash_serde, Hash256};
use mrplan_core::job::JobGraph;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compiled {
    pub graph: JobGraph,
    pub warnings: Vec<Warning>,
}

impl Compiled {
    pub fn new(graph: JobGraph, warnings: Vec<Warning>) -> Self {
        Self { graph, warnings }
    }

    /// Stable fingerprint of the job graph; warnings are not included.
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(&self.graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
