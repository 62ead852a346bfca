//! Per-compilation state shared by the builder and the post-passes.

use mrplan_core::config::CompilerConfig;
use mrplan_core::error::Warning;
use mrplan_core::file::{FileSpec, TempAllocator};
use mrplan_core::id::{IdGen, JobId, OpId};

/// Id source, temp allocator and collected warnings for one compilation.
#[derive(Debug, Clone)]
pub struct Session {
    pub ids: IdGen,
    pub temps: TempAllocator,
    pub warnings: Vec<Warning>,
}

impl Session {
    /// Fresh session for a plan whose largest operator id is `max_op`.
    pub fn new(config: &CompilerConfig, max_op: Option<OpId>) -> Self {
        Self {
            ids: IdGen::starting_after(max_op),
            temps: config.temp_allocator(),
            warnings: Vec::new(),
        }
    }

    pub fn op_id(&mut self) -> OpId {
        self.ids.op()
    }

    pub fn job_id(&mut self) -> JobId {
        self.ids.job()
    }

    pub fn temp_file(&mut self) -> FileSpec {
        self.temps.next_spec()
    }

    /// Record a non-fatal condition and log it.
    pub fn warn(&mut self, op: Option<OpId>, job: Option<JobId>, message: impl Into<String>) {
        let warning = Warning {
            op,
            job,
            message: message.into(),
        };
        tracing::warn!(%warning, "compile warning");
        self.warnings.push(warning);
    }
}
