//! Post-passes over a built job graph.
//!
//! Both are local rewrites: they move operators between adjacent jobs or
//! add one job, and never change what the graph computes.

pub mod limit;
pub mod rearrange;

pub use limit::adjust_limits;
pub use rearrange::adjust_rearranges;

use mrplan_core::config::CompilerConfig;
use mrplan_core::error::Result;
use mrplan_core::job::JobGraph;

use crate::session::Session;

/// Run the enabled post-passes: rearranges first, then limits.
pub fn apply(graph: &mut JobGraph, session: &mut Session, config: &CompilerConfig) -> Result<()> {
    if config.adjust_rearranges {
        adjust_rearranges(graph, session)?;
    }
    if config.adjust_limits {
        adjust_limits(graph, session)?;
    }
    for job in graph.jobs_mut() {
        job.refresh_udfs();
    }
    Ok(())
}
