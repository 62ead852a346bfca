//! Job-graph shape tests over the public compile entry points.

mod common;

use common::*;
use mrplan_core::config::CompilerConfig;
use mrplan_core::error::ErrorKind;
use mrplan_core::expr::Expr;
use mrplan_core::operator::{OpKind, RearrangeMode};
use mrplan_core::schema::DataType;
use mrplan_planner::verify::{assert_stage_order, assert_topological};
use mrplan_planner::{compile, Collaborators, JobBuilder, PlanBuilder};

fn filter() -> OpKind {
    OpKind::Filter {
        predicate: Expr::column(0, DataType::Boolean),
    }
}

fn group() -> OpKind {
    OpKind::Package {
        num_inputs: 1,
        inner: vec![false],
        distinct: false,
    }
}

fn rearrange() -> OpKind {
    OpKind::LocalRearrange {
        index: 0,
        keys: vec![Expr::column(0, DataType::Int64)],
        key_type: DataType::Int64,
        mode: RearrangeMode::Keyed,
    }
}

#[test]
fn test_every_job_ends_in_a_store() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let r = b.op(rearrange(), &[l]).expect("rearrange");
    let g = b.op(OpKind::GlobalRearrange, &[r]).expect("shuffle");
    let p = b.op(group(), &[g]).expect("package");
    let s = b.op(sort_by(0, None), &[p]).expect("sort");
    let d = b.op(OpKind::Distinct, &[s]).expect("distinct");
    b.store(d, "out", "PigStorage").expect("store");

    let compiled = compile(&b.build(), &config_with_reducers(3), &Collaborators::default())
        .expect("compile");
    for job in compiled.graph.jobs() {
        assert!(job.is_finished(), "{} left open", job.id);
        for leaf in job.final_plan().leaves() {
            assert!(job.final_plan().node(leaf).expect("leaf").is_store());
        }
    }
    assert_topological(&compiled.graph);
    assert_stage_order(&compiled.graph);
}

#[test]
fn test_non_store_leaf_is_structural() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    b.op(filter(), &[l]).expect("filter");

    let err = compile(&b.build(), &CompilerConfig::default(), &Collaborators::default())
        .expect_err("dangling filter must fail");
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn test_union_takes_the_largest_parallelism() {
    let mut b = PlanBuilder::new();
    let a = b.load("in/a", "PigStorage").expect("load a");
    let c = b.load("in/b", "BinStorage").expect("load b");
    let u = b.op(OpKind::Union, &[a, c]).expect("union");
    b.store(u, "out", "PigStorage").expect("store");
    b.set_parallelism(a, 3).expect("parallelism");
    b.set_parallelism(c, 7).expect("parallelism");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    assert_eq!(compiled.graph.len(), 1);
    let job = compiled.graph.jobs().next().expect("one job");
    assert_eq!(job.parallelism, Some(7));
    assert_eq!(job.map.roots().len(), 2);
    assert!(job.udfs.iter().any(|f| f.name == "BinStorage"));
}

#[test]
fn test_split_is_compiled_once() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let sp = b.op(OpKind::Split { file: None }, &[l]).expect("split");
    let f1 = b.op(filter(), &[sp]).expect("branch 1");
    let f2 = b.op(filter(), &[sp]).expect("branch 2");
    b.store(f1, "out/1", "PigStorage").expect("store 1");
    b.store(f2, "out/2", "PigStorage").expect("store 2");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    let graph = &compiled.graph;
    assert_eq!(graph.len(), 3);
    let splitter = only_job(graph, |j| j.splitter);
    let consumers = graph.successors(splitter.id);
    assert_eq!(consumers.len(), 2);
    assert_eq!(graph.roots(), vec![splitter.id]);
}

#[test]
fn test_skewed_join_uses_partition_fanout() {
    let join = OpKind::SkewedJoin {
        keys: vec![int_key(0), int_key(1)],
        outer: vec![false, false],
        schemas: vec![None, None],
    };
    let plan = two_way(join, Some(40));
    let collab = Collaborators::new(
        mrplan_planner::StaticCapabilities::new(),
        mrplan_planner::FixedFanout(5),
    );

    let compiled = compile(&plan, &config_with_reducers(10), &collab).expect("compile");
    let graph = &compiled.graph;
    let job = only_job(graph, |j| j.skewed_join);
    assert_eq!(job.parallelism, Some(5));
    assert!(job.multi_input_shuffle);

    let mut modes: Vec<(usize, RearrangeMode)> = job
        .map
        .operators()
        .filter_map(|op| match &op.kind {
            OpKind::LocalRearrange { index, mode, .. } => Some((*index, mode.clone())),
            _ => None,
        })
        .collect();
    modes.sort_by_key(|(i, _)| *i);
    assert_eq!(modes.len(), 2);
    assert_eq!(modes[0].1, RearrangeMode::Keyed);
    assert!(matches!(modes[1].1, RearrangeMode::Scatter { .. }));

    let sampler = only_job(graph, |j| j.sampler);
    assert_eq!(sampler.parallelism, Some(1));
    assert!(graph.predecessors(job.id).contains(&sampler.id));
    assert!(compiled.warnings.is_empty());
}

#[test]
fn test_order_by_is_sampler_plus_sort() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let s = b.op(sort_by(1, None), &[l]).expect("sort");
    b.store(s, "out", "PigStorage").expect("store");
    b.set_parallelism(s, 4).expect("parallelism");
    let plan = b.build();

    let config = CompilerConfig::default();
    let collab = Collaborators::default();
    let (graph, _) = JobBuilder::new(&plan, &config, &collab)
        .expect("builder")
        .build()
        .expect("build");
    assert_eq!(graph.len(), 2);
    let sampler = only_job(&graph, |j| j.sampler);
    let sort = only_job(&graph, |j| j.global_sort);
    assert_eq!(sampler.parallelism, Some(1));
    assert_eq!(sort.parallelism, Some(4));
    assert_eq!(graph.edges(), &[(sampler.id, sort.id)]);
    let quantiles = sort.quantile_file.as_ref().expect("quantile file");
    assert_eq!(store_paths(sampler), vec![quantiles.path.clone()]);
    assert!(!names(&sort.reduce).contains(&"Limit"));
}

#[test]
fn test_order_by_with_limit_keeps_two_jobs() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let s = b.op(sort_by(1, Some(10)), &[l]).expect("sort");
    b.store(s, "out", "PigStorage").expect("store");
    b.set_parallelism(s, 4).expect("parallelism");
    let plan = b.build();

    let config = CompilerConfig::default();
    let collab = Collaborators::default();
    let (graph, _) = JobBuilder::new(&plan, &config, &collab)
        .expect("builder")
        .build()
        .expect("build");
    assert_eq!(graph.len(), 2);
    let sort = only_job(&graph, |j| j.global_sort);
    assert_eq!(sort.limit, Some(10));
    assert!(names(&sort.reduce).contains(&"Limit"));
    assert!(!sort.combine.is_empty());
}

#[test]
fn test_limit_adjuster_adds_single_reducer_job() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let r = b.op(rearrange(), &[l]).expect("rearrange");
    let g = b.op(OpKind::GlobalRearrange, &[r]).expect("shuffle");
    let p = b.op(group(), &[g]).expect("package");
    let lim = b.op(OpKind::Limit { count: 10 }, &[p]).expect("limit");
    let st = b.store(lim, "out", "PigStorage").expect("store");
    b.set_parallelism(g, 4).expect("parallelism");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    let graph = &compiled.graph;
    assert_eq!(graph.len(), 2);
    let order = graph.topological_order().expect("dag");
    let first = graph.job(order[0]).expect("first");
    let second = graph.job(order[1]).expect("second");

    assert_eq!(first.parallelism, Some(4));
    let temp = store_paths(first);
    assert_eq!(temp.len(), 1);
    assert_ne!(temp[0], "out");

    assert_eq!(second.parallelism, Some(1));
    assert_eq!(second.limit, Some(10));
    let load = ops_of(&second.map)[0];
    assert_eq!(load.load_file().map(|f| f.path.clone()), Some(temp[0].clone()));
    assert!(names(&second.reduce).contains(&"Limit"));
    assert_eq!(store_paths(second), vec!["out".to_string()]);
    assert!(second.reduce.contains(st));
}

#[test]
fn test_rearrange_moves_into_the_downstream_map() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let r1 = b.op(rearrange(), &[l]).expect("rearrange 1");
    let g1 = b.op(OpKind::GlobalRearrange, &[r1]).expect("shuffle 1");
    let p1 = b.op(group(), &[g1]).expect("package 1");
    let r2 = b.op(rearrange(), &[p1]).expect("rearrange 2");
    let g2 = b.op(OpKind::GlobalRearrange, &[r2]).expect("shuffle 2");
    let p2 = b.op(group(), &[g2]).expect("package 2");
    b.store(p2, "out", "PigStorage").expect("store");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    let graph = &compiled.graph;
    assert_eq!(graph.len(), 2);
    let order = graph.topological_order().expect("dag");
    let first = graph.job(order[0]).expect("first");
    let second = graph.job(order[1]).expect("second");

    assert!(!first.reduce.contains(r2));
    assert_eq!(names(&first.reduce), vec!["Package", "Store"]);
    assert_eq!(names(&second.map), vec!["Load", "LocalRearrange"]);
    assert!(second.map.contains(r2));
    assert!(compiled.warnings.is_empty());
}

#[test]
fn test_post_passes_can_be_disabled() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let r = b.op(rearrange(), &[l]).expect("rearrange");
    let g = b.op(OpKind::GlobalRearrange, &[r]).expect("shuffle");
    let p = b.op(group(), &[g]).expect("package");
    let lim = b.op(OpKind::Limit { count: 3 }, &[p]).expect("limit");
    b.store(lim, "out", "PigStorage").expect("store");
    b.set_parallelism(g, 4).expect("parallelism");

    let config = CompilerConfig {
        adjust_limits: false,
        ..Default::default()
    };
    let compiled = compile(&b.build(), &config, &Collaborators::default()).expect("compile");
    assert_eq!(compiled.graph.len(), 1);
}

#[test]
fn test_map_side_limit_forces_one_reducer() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let lim = b.op(OpKind::Limit { count: 5 }, &[l]).expect("limit");
    b.store(lim, "out", "PigStorage").expect("store");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    assert_eq!(compiled.graph.len(), 1);
    let job = compiled.graph.jobs().next().expect("job");
    assert_eq!(job.parallelism, Some(1));
    assert_eq!(job.limit, Some(5));
    assert!(job.map.contains(lim));
    assert_eq!(
        names(&job.reduce),
        vec!["Package", "ForEach", "Limit", "Store"]
    );
}

#[test]
fn test_distinct_sets_combiner_flag() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let d = b.op(OpKind::Distinct, &[l]).expect("distinct");
    b.store(d, "out", "PigStorage").expect("store");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    let job = only_job(&compiled.graph, |j| j.needs_distinct_combiner);
    assert_eq!(names(&job.map), vec!["Load", "LocalRearrange"]);
    assert_eq!(names(&job.reduce), vec!["Package", "ForEach", "Store"]);
    // The unwrapping ForEach keeps the Distinct's id.
    assert_eq!(op(&job.reduce, d.get()).name(), "ForEach");
}

#[test]
fn test_unknown_reducer_count_is_a_warning() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let s = b.op(sort_by(0, None), &[l]).expect("sort");
    b.store(s, "out", "PigStorage").expect("store");

    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");
    let sort = only_job(&compiled.graph, |j| j.global_sort);
    assert_eq!(sort.parallelism, Some(1));
    assert_eq!(compiled.warnings.len(), 1);
    assert_eq!(compiled.warnings[0].op, Some(s));
}

#[test]
fn test_same_seed_same_fingerprint() {
    let build = || {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").expect("load");
        let s = b.op(sort_by(0, Some(3)), &[l]).expect("sort");
        b.store(s, "out", "PigStorage").expect("store");
        b.build()
    };
    let collab = Collaborators::default();
    let a = compile(&build(), &config_with_reducers(4), &collab).expect("compile a");
    let b = compile(&build(), &config_with_reducers(4), &collab).expect("compile b");
    assert_eq!(
        a.fingerprint().expect("hash a"),
        b.fingerprint().expect("hash b")
    );

    let other = CompilerConfig {
        seed: 8,
        ..config_with_reducers(4)
    };
    let c = compile(&build(), &other, &collab).expect("compile c");
    assert_ne!(
        a.fingerprint().expect("hash a"),
        c.fingerprint().expect("hash c")
    );
}

#[test]
fn test_compiled_graph_round_trips_through_json() {
    let mut b = PlanBuilder::new();
    let l = b.load("in", "PigStorage").expect("load");
    let d = b.op(OpKind::Distinct, &[l]).expect("distinct");
    b.store(d, "out", "PigStorage").expect("store");
    let compiled =
        compile(&b.build(), &CompilerConfig::default(), &Collaborators::default()).expect("compile");

    let json = compiled.to_json().expect("json");
    let back: mrplan_planner::Compiled = serde_json::from_str(&json).expect("parse");
    assert_eq!(back.graph, compiled.graph);
    assert_eq!(back.warnings, compiled.warnings);
}
