//! Job builder: places every operator of the input plan into some job.
//!
//! Traversal is predecessor-first and memoized by operator id, so shared
//! subgraphs (split outputs, stores read back by later loads) compile once.
//! The job an operator lands in is the return value of `visit`; there is no
//! "current job" field to save and restore around recursive calls.

use std::collections::HashMap;

use mrplan_core::config::CompilerConfig;
use mrplan_core::dag::OperatorPlan;
use mrplan_core::error::{Error, Result};
use mrplan_core::expr::Expr;
use mrplan_core::file::FileSpec;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::job::{Job, JobGraph};
use mrplan_core::operator::{OpKind, Operator, Projection};

use crate::capability::Collaborators;
use crate::logical::check_input;
use crate::physical::Compiled;
use crate::session::Session;
use crate::stage::{self, open_stage, Stage};
use crate::{rules, verify};

/// Compile `plan` into a verified job graph, post-passes included.
pub fn compile(
    plan: &OperatorPlan,
    config: &CompilerConfig,
    collab: &Collaborators,
) -> Result<Compiled> {
    let (mut graph, mut session) = JobBuilder::new(plan, config, collab)?.build()?;
    rules::apply(&mut graph, &mut session, config)?;
    verify::check(&graph)?;
    tracing::info!(
        operators = plan.len(),
        jobs = graph.len(),
        warnings = session.warnings.len(),
        "compiled plan"
    );
    Ok(Compiled::new(graph, session.warnings))
}

pub struct JobBuilder<'a> {
    pub(crate) plan: &'a OperatorPlan,
    pub(crate) config: &'a CompilerConfig,
    pub(crate) collab: &'a Collaborators,
    pub(crate) session: Session,
    pub(crate) graph: JobGraph,
    /// Job currently holding each compiled operator's output.
    pub(crate) owners: HashMap<OpId, JobId>,
    /// File each compiled split writes.
    pub(crate) splits: HashMap<OpId, FileSpec>,
}

impl<'a> JobBuilder<'a> {
    pub fn new(
        plan: &'a OperatorPlan,
        config: &'a CompilerConfig,
        collab: &'a Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        check_input(plan)?;
        Ok(Self {
            plan,
            config,
            collab,
            session: Session::new(config, plan.max_id()),
            graph: JobGraph::new(),
            owners: HashMap::new(),
            splits: HashMap::new(),
        })
    }

    /// Compile every leaf in ascending id order. Post-passes are not run.
    pub fn build(mut self) -> Result<(JobGraph, Session)> {
        for leaf in self.plan.leaves() {
            self.visit(leaf)?;
        }
        for job in self.graph.jobs_mut() {
            job.refresh_udfs();
        }
        tracing::debug!(jobs = self.graph.len(), "built job graph");
        Ok((self.graph, self.session))
    }

    pub(crate) fn visit(&mut self, id: OpId) -> Result<JobId> {
        if let Some(job) = self.owners.get(&id) {
            return Ok(*job);
        }
        let op = self.plan.node(id)?.clone();
        let preds = self.plan.predecessors(id);
        let job = match op.kind {
            OpKind::Load { .. } => self.compile_load(op, &preds)?,
            OpKind::Filter { .. }
            | OpKind::ForEach { .. }
            | OpKind::LocalRearrange { .. }
            | OpKind::Package { .. }
            | OpKind::Union
            | OpKind::Store { .. }
            | OpKind::Stream { .. } => self.compile_non_blocking(op, &preds)?,
            OpKind::GlobalRearrange => self.compile_global_rearrange(op, &preds)?,
            OpKind::Split { .. } => self.compile_split(op, &preds)?,
            OpKind::CollectedGroup { .. } => self.compile_collected_group(op, &preds)?,
            OpKind::Distinct => self.compile_distinct(op, &preds)?,
            OpKind::Sort { .. } => self.compile_sort(op, &preds)?,
            OpKind::Limit { .. } => self.compile_limit(op, &preds)?,
            OpKind::HashJoin { .. } => self.compile_hash_join(op, &preds)?,
            OpKind::ReplicatedJoin { .. } => self.compile_replicated_join(op, &preds)?,
            OpKind::SkewedJoin { .. } => self.compile_skewed_join(op, &preds)?,
            OpKind::MergeJoin { .. } => self.compile_merge_join(op, &preds)?,
        };
        tracing::debug!(op = %id, job = %job, "placed operator");
        self.owners.insert(id, job);
        Ok(job)
    }

    /// Job whose open stage receives the output of `pred`.
    ///
    /// Every consumer of a split gets its own fresh job reading the split
    /// file; the splitter itself is compiled once.
    pub(crate) fn input_of(&mut self, pred: OpId) -> Result<JobId> {
        let is_split = matches!(self.plan.node(pred)?.kind, OpKind::Split { .. });
        let job = self.visit(pred)?;
        if !is_split {
            return Ok(job);
        }
        let file = self
            .splits
            .get(&pred)
            .cloned()
            .ok_or_else(|| Error::structural(Some(pred), "split compiled without a file"))?;
        let temp = self.session.temps.is_temp(&file);
        let load = Operator::new(
            self.session.op_id(),
            OpKind::Load {
                file,
                schema: None,
                temp,
            },
        );
        let fresh = self.open_job_with(load)?;
        self.graph.connect(job, fresh)?;
        tracing::debug!(split = %pred, splitter = %job, consumer = %fresh, "split consumer");
        Ok(fresh)
    }

    pub(crate) fn inputs(&mut self, preds: &[OpId]) -> Result<Vec<JobId>> {
        preds.iter().map(|p| self.input_of(*p)).collect()
    }

    pub(crate) fn new_job(&mut self) -> JobId {
        let id = self.session.job_id();
        self.graph.add(Job::new(id));
        tracing::debug!(job = %id, "opened job");
        id
    }

    pub(crate) fn open_job_with(&mut self, op: Operator) -> Result<JobId> {
        let job = self.new_job();
        self.append(job, op)?;
        Ok(job)
    }

    pub(crate) fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.graph.job_mut(id)
    }

    pub(crate) fn stage_of(&self, id: JobId) -> Result<Stage> {
        Ok(open_stage(self.graph.job(id)?))
    }

    /// Append to the open stage; a requested parallelism raises the job's.
    pub(crate) fn append(&mut self, job: JobId, op: Operator) -> Result<OpId> {
        let requested = op.parallelism;
        let target = self.job_mut(job)?;
        let id = stage::append_to_open(target, op)?;
        if let Some(p) = requested {
            target.parallelism = Some(target.parallelism.map_or(p, |cur| cur.max(p)));
        }
        Ok(id)
    }

    pub(crate) fn close_map(&mut self, job: JobId, multi: bool) -> Result<()> {
        stage::close_map(self.job_mut(job)?, multi)
    }

    /// End the open stage of `job` with a store to a fresh temp file.
    pub(crate) fn materialize(&mut self, job: JobId) -> Result<FileSpec> {
        let file = self.session.temp_file();
        let id = self.session.op_id();
        stage::end_with_store(self.job_mut(job)?, id, file.clone(), true)?;
        Ok(file)
    }

    /// Materialize `job` and open a fresh job reading its output.
    pub(crate) fn bridge(&mut self, job: JobId) -> Result<JobId> {
        let file = self.materialize(job)?;
        let load = Operator::temp_load(self.session.op_id(), file);
        let fresh = self.open_job_with(load)?;
        self.graph.connect(job, fresh)?;
        tracing::debug!(from = %job, to = %fresh, "bridged through temp file");
        Ok(fresh)
    }

    /// Open a shuffle boundary after the open stage of `job`.
    pub(crate) fn close_boundary(&mut self, job: JobId) -> Result<JobId> {
        match self.stage_of(job)? {
            Stage::MapOpen => {
                self.close_map(job, false)?;
                Ok(job)
            }
            Stage::ReduceOpen => {
                let fresh = self.bridge(job)?;
                self.close_map(fresh, false)?;
                Ok(fresh)
            }
            Stage::Finished => Err(Error::structural(
                None,
                format!("cannot open a shuffle after {}: both stages closed", job),
            )),
        }
    }

    /// Point memo entries at `to` after `from` was folded into it.
    pub(crate) fn retarget_owners(&mut self, from: JobId, to: JobId) {
        for owner in self.owners.values_mut() {
            if *owner == from {
                *owner = to;
            }
        }
    }

    /// Cluster default reducer count, or 1 with a warning when the
    /// environment cannot say.
    pub(crate) fn default_reducers(&mut self, op: OpId, job: Option<JobId>) -> usize {
        match self.config.cluster_reducers() {
            Ok(p) => p,
            Err(e) => {
                self.session
                    .warn(Some(op), job, format!("{e}; using 1 reducer"));
                1
            }
        }
    }

    fn compile_load(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        match preds {
            [] => self.open_job_with(op),
            [store] if self.plan.node(*store)?.is_store() => {
                let producer = self.visit(*store)?;
                let fresh = self.open_job_with(op)?;
                self.graph.connect(producer, fresh)?;
                tracing::debug!(producer = %producer, consumer = %fresh, "chained load after store");
                Ok(fresh)
            }
            _ => Err(Error::structural(
                Some(op.id),
                "a Load may only follow a single Store",
            )),
        }
    }

    fn compile_non_blocking(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        match preds {
            [] => Err(Error::structural(
                Some(op.id),
                format!("{} has no input", op.name()),
            )),
            [pred] => {
                let job = self.input_of(*pred)?;
                self.append(job, op)?;
                Ok(job)
            }
            _ => {
                let inputs = self.inputs(preds)?;
                let merged = self.merge_and_bridge(&inputs)?;
                self.append(merged, op)?;
                Ok(merged)
            }
        }
    }

    fn compile_global_rearrange(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let job = match preds {
            [] => {
                return Err(Error::structural(
                    Some(op.id),
                    "GlobalRearrange has no input",
                ))
            }
            [pred] => {
                let input = self.input_of(*pred)?;
                self.close_boundary(input)?
            }
            _ => {
                let inputs = self.inputs(preds)?;
                let merged = self.merge_and_bridge(&inputs)?;
                self.close_map(merged, true)?;
                merged
            }
        };
        if let Some(p) = op.parallelism {
            let target = self.job_mut(job)?;
            target.parallelism = Some(target.parallelism.map_or(p, |cur| cur.max(p)));
        }
        Ok(job)
    }

    fn compile_split(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let pred = single_input(&op, preds)?;
        let job = self.input_of(pred)?;
        let (file, temp) = match &op.kind {
            OpKind::Split { file: Some(file) } => (file.clone(), false),
            _ => (self.session.temp_file(), true),
        };
        let store_id = self.session.op_id();
        let target = self.job_mut(job)?;
        stage::end_with_store(target, store_id, file.clone(), temp)?;
        target.splitter = true;
        self.splits.insert(op.id, file);
        tracing::debug!(split = %op.id, job = %job, "compiled split");
        Ok(job)
    }

    fn compile_collected_group(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let pred = single_input(&op, preds)?;
        let job = self.input_of(pred)?;
        let current = self.graph.job(job)?;
        if current.map_closed {
            return Err(Error::user_input(
                Some(op.id),
                "collected group must run in the map stage, but it follows a shuffle",
            ));
        }
        for root in current.map.roots() {
            let loader = current.map.node(root)?.load_file().map(|f| &f.func);
            let supported = loader
                .map(|func| self.collab.loaders.supports_collected_group(func))
                .unwrap_or(false);
            if !supported {
                let name = loader.map(|f| f.name.as_str()).unwrap_or("non-load root");
                return Err(Error::user_input(
                    Some(op.id),
                    format!("loader {name} cannot guarantee keys stay within one split"),
                ));
            }
        }
        self.append(job, op)?;
        Ok(job)
    }
}

pub(crate) fn single_input(op: &Operator, preds: &[OpId]) -> Result<OpId> {
    match preds {
        [only] => Ok(*only),
        _ => Err(Error::structural(
            Some(op.id),
            format!("{} expects one input, found {}", op.name(), preds.len()),
        )),
    }
}

/// Tail operator of a lowering: keeps the source operator's identity,
/// requested parallelism and alias.
pub(crate) fn tail_of(op: &Operator, kind: OpKind) -> Operator {
    Operator {
        id: op.id,
        kind,
        parallelism: op.parallelism,
        result_type: op.result_type,
        alias: op.alias.clone(),
    }
}

/// `ForEach` that flattens the bag of each listed projection.
pub(crate) fn flatten_bags(items: Vec<Expr>) -> OpKind {
    OpKind::ForEach {
        items: items.into_iter().map(Projection::flattened).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::PlanBuilder;
    use mrplan_core::error::ErrorKind;

    fn build(plan: &OperatorPlan) -> Result<(JobGraph, Session)> {
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        JobBuilder::new(plan, &config, &collab)?.build()
    }

    fn filter() -> OpKind {
        OpKind::Filter {
            predicate: Expr::Star,
        }
    }

    #[test]
    fn linear_plan_is_one_map_only_job() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let f = b.op(filter(), &[l]).unwrap();
        b.store(f, "out", "PigStorage").unwrap();
        let (graph, _) = build(&b.build()).unwrap();
        assert_eq!(graph.len(), 1);
        let job = graph.jobs().next().unwrap();
        assert!(job.is_finished());
        assert!(job.reduce.is_empty());
        assert_eq!(job.map.len(), 3);
    }

    #[test]
    fn group_after_shuffle_bridges_into_a_second_job() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let g1 = b.op(OpKind::GlobalRearrange, &[l]).unwrap();
        let g2 = b.op(OpKind::GlobalRearrange, &[g1]).unwrap();
        b.store(g2, "out", "PigStorage").unwrap();
        let (graph, _) = build(&b.build()).unwrap();
        assert_eq!(graph.len(), 2);
        let order = graph.topological_order().unwrap();
        let second = graph.job(order[1]).unwrap();
        assert!(second.map_closed);
        assert!(second.map.sole_leaf().unwrap().is_load());
    }

    #[test]
    fn chained_load_reads_the_earlier_store() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let s = b.store(l, "mid", "PigStorage").unwrap();
        let id = OpId::new(2);
        let file = FileSpec::new("mid", mrplan_core::file::FuncSpec::new("PigStorage"));
        b.add(Operator::load(id, file), &[s]).unwrap();
        b.store(id, "out", "PigStorage").unwrap();
        let (graph, _) = build(&b.build()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn appending_after_a_finished_job_is_structural() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let f = b.op(filter(), &[l]).unwrap();
        b.store(f, "out", "PigStorage").unwrap();
        let plan = b.build();
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        let mut builder = JobBuilder::new(&plan, &config, &collab).unwrap();
        let job = builder.visit(OpId::new(2)).unwrap();
        let err = builder
            .append(job, Operator::new(OpId::new(99), filter()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn collected_group_needs_a_capable_loader() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let g = b
            .op(OpKind::CollectedGroup { keys: vec![Expr::Star] }, &[l])
            .unwrap();
        b.store(g, "out", "PigStorage").unwrap();
        let plan = b.build();
        let err = build(&plan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserInput);

        let config = CompilerConfig {
            collected_group_loaders: vec!["PigStorage".into()],
            ..Default::default()
        };
        let collab = Collaborators::from_config(&config);
        let (graph, _) = JobBuilder::new(&plan, &config, &collab)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.len(), 1);
    }
}
