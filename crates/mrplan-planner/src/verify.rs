//! Structural checks on a compiled job graph.
//!
//! `compile` runs `check` on every graph it returns; the `assert_*` helpers
//! are for tests that want a panic with the offending job in the message.

use std::collections::BTreeSet;

use mrplan_core::error::{Error, Result};
use mrplan_core::job::{Job, JobGraph};

/// Acyclic; no reduce content ahead of an open map stage; every job is
/// finished and ends in stores; every edge is backed by a file the
/// producer writes and the consumer reads.
pub fn check(graph: &JobGraph) -> Result<()> {
    graph.topological_order()?;
    for job in graph.jobs() {
        check_job(job)?;
    }
    for (from, to) in graph.edges() {
        let producer = graph.job(*from)?;
        let consumer = graph.job(*to)?;
        let written: BTreeSet<&str> = producer
            .output_files()
            .into_iter()
            .map(|f| f.path.as_str())
            .collect();
        let backed = consumer
            .input_files()
            .into_iter()
            .any(|f| written.contains(f.path.as_str()));
        if !backed {
            return Err(Error::structural(
                None,
                format!("edge {from} -> {to} is not backed by a file {to} reads"),
            ));
        }
    }
    Ok(())
}

fn check_job(job: &Job) -> Result<()> {
    if !job.reduce.is_empty() && !job.map_closed {
        return Err(Error::structural(
            None,
            format!("{} has reduce operators while its map stage is open", job.id),
        ));
    }
    if !job.is_finished() {
        return Err(Error::structural(
            None,
            format!("{} was left open", job.id),
        ));
    }
    for plan in [&job.map, &job.combine, &job.reduce] {
        plan.topological_order()?;
    }
    let last = job.final_plan();
    if last.is_empty() {
        return Err(Error::structural(None, format!("{} is empty", job.id)));
    }
    for leaf in last.leaves() {
        let op = last.node(leaf)?;
        if !op.is_store() {
            return Err(Error::structural(
                Some(leaf),
                format!("{} ends in {} instead of a Store", job.id, op.name()),
            ));
        }
    }
    Ok(())
}

/// Panic unless every edge points forward in the graph's topological order.
pub fn assert_topological(graph: &JobGraph) {
    let order = graph
        .topological_order()
        .unwrap_or_else(|e| panic!("job graph is not a DAG: {e}"));
    let mut seen = std::collections::HashSet::new();
    for id in &order {
        for pred in graph.predecessors(*id) {
            assert!(seen.contains(&pred), "dependency {pred} not satisfied before {id}");
        }
        seen.insert(*id);
    }
}

/// Panic if any job is map-open with reduce content.
pub fn assert_stage_order(graph: &JobGraph) {
    for job in graph.jobs() {
        assert!(
            job.map_closed || job.reduce.is_empty(),
            "{} has reduce operators while its map stage is open",
            job.id
        );
    }
}
