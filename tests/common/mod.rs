//! Plan fixtures shared by the integration tests.
#![allow(dead_code)]

use mrplan_core::prelude::*;
use mrplan_planner::PlanBuilder;

pub fn config_with_reducers(reducers: usize) -> CompilerConfig {
    CompilerConfig {
        default_parallelism: Some(reducers),
        seed: 7,
        ..Default::default()
    }
}

pub fn int_key(col: usize) -> Vec<Expr> {
    vec![Expr::column(col, DataType::Int64)]
}

pub fn schema(n: usize) -> Schema {
    Schema::new(
        (0..n)
            .map(|i| Field::new(format!("f{i}"), DataType::Int64, true))
            .collect(),
    )
}

pub fn sort_by(col: usize, limit: Option<u64>) -> OpKind {
    OpKind::Sort {
        keys: vec![SortKey {
            expr: Expr::column(col, DataType::Int64),
            ascending: true,
        }],
        comparator: None,
        limit,
    }
}

/// `load a, load b -> join -> store out`, with the join kind supplied.
pub fn two_way(join: OpKind, parallelism: Option<usize>) -> OperatorPlan {
    let mut b = PlanBuilder::new();
    let a = b.load("in/a", "PigStorage").expect("load a");
    let c = b.load("in/b", "PigStorage").expect("load b");
    let j = b.op(join, &[a, c]).expect("join");
    if let Some(p) = parallelism {
        b.set_parallelism(j, p).expect("parallelism");
    }
    b.store(j, "out", "PigStorage").expect("store");
    b.build()
}

pub fn only_job<'a>(graph: &'a JobGraph, pred: impl Fn(&Job) -> bool) -> &'a Job {
    let mut hits = graph.jobs().filter(|j| pred(j));
    let job = hits.next().expect("no job matched");
    assert!(hits.next().is_none(), "more than one job matched");
    job
}

pub fn ops_of<'a>(plan: &'a OperatorPlan) -> Vec<&'a Operator> {
    plan.topological_order()
        .expect("sub-plan is acyclic")
        .into_iter()
        .filter_map(|id| plan.get(id))
        .collect()
}

pub fn names(plan: &OperatorPlan) -> Vec<&'static str> {
    ops_of(plan).into_iter().map(|op| op.name()).collect()
}

pub fn store_paths(job: &Job) -> Vec<String> {
    job.output_files().into_iter().map(|f| f.path.clone()).collect()
}

pub fn op(plan: &OperatorPlan, id: u64) -> &Operator {
    plan.get(OpId::new(id)).expect("operator present")
}
