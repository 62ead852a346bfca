//! Two-phase jobs and the job-level DAG the executor consumes.
//!
//! An edge `a -> b` means "b reads a file a writes": it is both a data
//! dependency and a scheduling constraint. The executor may not start `b`
//! before `a`'s output is fully committed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::dag::OperatorPlan;
use crate::error::{Error, Result};
use crate::file::{FileSpec, FuncSpec};
use crate::id::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub map: OperatorPlan,
    pub combine: OperatorPlan,
    pub reduce: OperatorPlan,
    pub map_closed: bool,
    pub reduce_closed: bool,
    /// The map stage was closed by a boundary with several input branches;
    /// the reduce side sees an n-way keyed union.
    pub multi_input_shuffle: bool,
    pub parallelism: Option<usize>,
    pub limit: Option<u64>,
    pub udfs: BTreeSet<FuncSpec>,
    pub splitter: bool,
    pub global_sort: bool,
    pub skewed_join: bool,
    pub sampler: bool,
    pub needs_distinct_combiner: bool,
    /// Ascending flags of the shuffle key columns (sort jobs only).
    pub sort_order: Vec<bool>,
    pub quantile_file: Option<FileSpec>,
    pub skew_partition_file: Option<FileSpec>,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            map: OperatorPlan::new(),
            combine: OperatorPlan::new(),
            reduce: OperatorPlan::new(),
            map_closed: false,
            reduce_closed: false,
            multi_input_shuffle: false,
            parallelism: None,
            limit: None,
            udfs: BTreeSet::new(),
            splitter: false,
            global_sort: false,
            skewed_join: false,
            sampler: false,
            needs_distinct_combiner: false,
            sort_order: vec![],
            quantile_file: None,
            skew_partition_file: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.map_closed && self.reduce_closed
    }

    /// Plan that produces this job's output: reduce if it has content, else map.
    pub fn final_plan(&self) -> &OperatorPlan {
        if self.reduce.is_empty() {
            &self.map
        } else {
            &self.reduce
        }
    }

    /// Files written by stores anywhere in the job.
    pub fn output_files(&self) -> Vec<&FileSpec> {
        [&self.map, &self.reduce]
            .into_iter()
            .flat_map(|p| p.operators().filter_map(|op| op.store_file()))
            .collect()
    }

    /// Files read by the job: map-stage loads plus operator side files.
    pub fn input_files(&self) -> Vec<&FileSpec> {
        let mut out: Vec<&FileSpec> = self
            .map
            .operators()
            .filter_map(|op| op.load_file())
            .collect();
        for plan in [&self.map, &self.combine, &self.reduce] {
            for op in plan.operators() {
                out.extend(op.side_files());
            }
        }
        out.extend(self.quantile_file.iter());
        out
    }

    /// Recompute the shipped function set from the three sub-plans, keeping
    /// references recorded by strategy lowering.
    pub fn refresh_udfs(&mut self) {
        let from_plans: BTreeSet<FuncSpec> = [&self.map, &self.combine, &self.reduce]
            .into_iter()
            .flat_map(|p| p.udfs())
            .collect();
        self.udfs.extend(from_plans);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobGraph {
    jobs: BTreeMap<JobId, Job>,
    edges: Vec<(JobId, JobId)>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn add(&mut self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.insert(id, job);
        id
    }

    pub fn job(&self, id: JobId) -> Result<&Job> {
        self.jobs
            .get(&id)
            .ok_or_else(|| Error::structural(None, format!("{id} is not in the job graph")))
    }

    pub fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| Error::structural(None, format!("{id} is not in the job graph")))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    pub fn edges(&self) -> &[(JobId, JobId)] {
        &self.edges
    }

    /// Remove a job and every edge touching it.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        self.edges.retain(|(f, t)| *f != id && *t != id);
        Some(job)
    }

    pub fn connect(&mut self, from: JobId, to: JobId) -> Result<()> {
        for id in [from, to] {
            if !self.jobs.contains_key(&id) {
                return Err(Error::structural(
                    None,
                    format!("cannot connect {id}: not in the job graph"),
                ));
            }
        }
        if from == to {
            return Err(Error::structural(None, format!("{from} cannot depend on itself")));
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(())
    }

    pub fn disconnect(&mut self, from: JobId, to: JobId) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| *e != (from, to));
        before != self.edges.len()
    }

    pub fn predecessors(&self, id: JobId) -> Vec<JobId> {
        self.edges
            .iter()
            .filter(|(_, t)| *t == id)
            .map(|(f, _)| *f)
            .collect()
    }

    pub fn successors(&self, id: JobId) -> Vec<JobId> {
        self.edges
            .iter()
            .filter(|(f, _)| *f == id)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn roots(&self) -> Vec<JobId> {
        let targets: BTreeSet<JobId> = self.edges.iter().map(|(_, t)| *t).collect();
        self.jobs
            .keys()
            .filter(|id| !targets.contains(id))
            .copied()
            .collect()
    }

    pub fn leaves(&self) -> Vec<JobId> {
        let sources: BTreeSet<JobId> = self.edges.iter().map(|(f, _)| *f).collect();
        self.jobs
            .keys()
            .filter(|id| !sources.contains(id))
            .copied()
            .collect()
    }

    /// Kahn order (ties broken by id); fails if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<JobId>> {
        let mut in_degree: BTreeMap<JobId, usize> = self.jobs.keys().map(|id| (*id, 0)).collect();
        for (_, t) in &self.edges {
            *in_degree.entry(*t).or_default() += 1;
        }
        let mut ready: VecDeque<JobId> = in_degree
            .iter()
            .filter_map(|(id, d)| (*d == 0).then_some(*id))
            .collect();
        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for s in self.successors(id) {
                if let Some(d) = in_degree.get_mut(&s) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(s);
                    }
                }
            }
        }
        if order.len() != self.jobs.len() {
            return Err(Error::structural(None, "job graph contains a cycle"));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: u64) -> JobGraph {
        let mut g = JobGraph::new();
        for i in 0..n {
            g.add(Job::new(JobId::new(i)));
        }
        g
    }

    #[test]
    fn remove_drops_incident_edges() {
        let mut g = graph(3);
        g.connect(JobId::new(0), JobId::new(1)).unwrap();
        g.connect(JobId::new(1), JobId::new(2)).unwrap();
        g.remove(JobId::new(1));
        assert!(g.edges().is_empty());
        assert_eq!(g.roots(), vec![JobId::new(0), JobId::new(2)]);
    }

    #[test]
    fn self_edges_are_rejected() {
        let mut g = graph(1);
        assert!(g.connect(JobId::new(0), JobId::new(0)).is_err());
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = graph(3);
        g.connect(JobId::new(2), JobId::new(0)).unwrap();
        g.connect(JobId::new(0), JobId::new(1)).unwrap();
        assert_eq!(
            g.topological_order().unwrap(),
            vec![JobId::new(2), JobId::new(0), JobId::new(1)]
        );
    }
}
