//! Human-readable rendering of a compiled job graph (EXPLAIN).

use std::fmt::Write;

use mrplan_core::dag::OperatorPlan;
use mrplan_core::job::Job;

use crate::physical::Compiled;

/// Render jobs in dependency order with their flags and stage contents,
/// followed by the edges and any warnings.
pub fn explain(compiled: &Compiled) -> String {
    let graph = &compiled.graph;
    let mut out = String::new();
    let _ = writeln!(out, "Job Graph");
    let _ = writeln!(out, "=========");
    if let Ok(hash) = compiled.fingerprint() {
        let _ = writeln!(out, "Plan hash: {}", hash.short());
    }
    let _ = writeln!(out, "Jobs: {}", graph.len());
    let _ = writeln!(out);

    let order = graph.topological_order().unwrap_or_else(|_| graph.ids());
    for (i, id) in order.iter().enumerate() {
        let Ok(job) = graph.job(*id) else { continue };
        let _ = writeln!(out, "{}. {}{}", i + 1, job.id, flags(job));
        match job.parallelism {
            Some(p) => {
                let _ = writeln!(out, "   parallelism: {p}");
            }
            None => {
                let _ = writeln!(out, "   parallelism: default");
            }
        }
        if let Some(limit) = job.limit {
            let _ = writeln!(out, "   limit: {limit}");
        }
        render_stage(&mut out, "map", &job.map);
        render_stage(&mut out, "combine", &job.combine);
        render_stage(&mut out, "reduce", &job.reduce);
    }

    if !graph.edges().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Edges:");
        for (from, to) in graph.edges() {
            let _ = writeln!(out, "  {from} -> {to}");
        }
    }
    if !compiled.warnings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Warnings:");
        for w in &compiled.warnings {
            let _ = writeln!(out, "  {w}");
        }
    }
    out
}

fn flags(job: &Job) -> String {
    let mut tags = Vec::new();
    if job.sampler {
        tags.push("sampler");
    }
    if job.global_sort {
        tags.push("global-sort");
    }
    if job.skewed_join {
        tags.push("skewed-join");
    }
    if job.splitter {
        tags.push("splitter");
    }
    if job.needs_distinct_combiner {
        tags.push("distinct-combiner");
    }
    if job.multi_input_shuffle {
        tags.push("multi-input");
    }
    if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    }
}

fn render_stage(out: &mut String, name: &str, plan: &OperatorPlan) {
    if plan.is_empty() {
        return;
    }
    let _ = writeln!(out, "   {name}:");
    let order = plan
        .topological_order()
        .unwrap_or_else(|_| plan.ids().collect());
    for id in order {
        if let Some(op) = plan.get(id) {
            let _ = writeln!(out, "     - {op}");
        }
    }
}
