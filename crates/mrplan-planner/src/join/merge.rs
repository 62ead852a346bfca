//! Sort-merge join of two inputs already sorted on the join key.
//!
//! The left input streams through the join in key order. The right input
//! is read as a random-access side file, either through a loader that can
//! seek by key natively or through an offline index built by a separate
//! single-reducer job.

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::{key_type, Expr};
use mrplan_core::file::FileSpec;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{MergeJoinRight, OpKind, Operator, RearrangeMode, SortKey};

use super::{check_key_lists, join_key_type};
use crate::compiler::JobBuilder;
use crate::sampling::wrap_loader;
use crate::stage::{self, open_leaf, Stage};

/// Right side resolved before the join is placed.
struct RightSide {
    right: MergeJoinRight,
    /// Job that must finish before the join job starts.
    index_job: Option<JobId>,
    /// Producers of the right file when the right job was dropped.
    upstream: Vec<JobId>,
    dropped: Option<JobId>,
}

impl JobBuilder<'_> {
    pub(crate) fn compile_merge_join(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let OpKind::MergeJoin { keys, .. } = &op.kind else {
            return Err(Error::structural(Some(op.id), "not a MergeJoin"));
        };
        if preds.len() != 2 {
            return Err(Error::structural(
                Some(op.id),
                format!("merge join needs exactly two inputs, found {}", preds.len()),
            ));
        }
        check_key_lists(&op, keys, 2)?;
        join_key_type(&op, keys)?;

        let candidates = self.inputs(preds)?;
        let (left, right) = self.pick_sides(&op, &candidates, preds)?;

        let side = self.resolve_right(&op, right, &keys[1])?;

        let target = match self.stage_of(left)? {
            Stage::MapOpen => left,
            Stage::ReduceOpen => self.bridge(left)?,
            Stage::Finished => {
                return Err(Error::structural(
                    Some(op.id),
                    format!("left input {left} has both stages closed"),
                ))
            }
        };
        let mut joined = op.clone();
        if let OpKind::MergeJoin { right, .. } = &mut joined.kind {
            *right = Some(side.right);
        }
        self.append(target, joined)?;

        match side.index_job {
            Some(index_job) => self.graph.connect(index_job, target)?,
            None => {
                for producer in side.upstream {
                    self.graph.connect(producer, target)?;
                }
            }
        }
        if let Some(dropped) = side.dropped {
            self.retarget_owners(dropped, target);
        }
        tracing::debug!(op = %op.id, job = %target, "lowered merge join");
        Ok(target)
    }

    /// Order the two input jobs as (left, right) by which one leads from the
    /// first logical predecessor.
    fn pick_sides(
        &self,
        op: &Operator,
        candidates: &[JobId],
        preds: &[OpId],
    ) -> Result<(JobId, JobId)> {
        let (&[first, second], Some(&left_pred)) = (candidates, preds.first()) else {
            return Err(Error::structural(
                Some(op.id),
                format!("merge join needs two input jobs, found {}", candidates.len()),
            ));
        };
        if self.leads_from(first, left_pred)? {
            Ok((first, second))
        } else if self.leads_from(second, left_pred)? {
            Ok((second, first))
        } else {
            Err(Error::structural(
                Some(op.id),
                "cannot tell which merge join input is the left side",
            ))
        }
    }

    /// True if `job`'s open stage ends in the output of `pred`.
    fn leads_from(&self, job: JobId, pred: OpId) -> Result<bool> {
        if self.owners.get(&pred) == Some(&job) {
            return Ok(true);
        }
        let current = self.graph.job(job)?;
        let Some(leaf) = open_leaf(current) else {
            return Ok(false);
        };
        if leaf.id == pred {
            return Ok(true);
        }
        let split_file = self.splits.get(&pred).map(|f| f.path.as_str());
        Ok(split_file.is_some() && leaf.load_file().map(|f| f.path.as_str()) == split_file)
    }

    fn resolve_right(&mut self, op: &Operator, right: JobId, keys: &[Expr]) -> Result<RightSide> {
        let right = match self.stage_of(right)? {
            Stage::MapOpen => right,
            Stage::ReduceOpen => self.bridge(right)?,
            Stage::Finished => {
                return Err(Error::structural(
                    Some(op.id),
                    format!("right input {right} has both stages closed"),
                ))
            }
        };

        let (root, file, pipeline) = {
            let job = self.graph.job(right)?;
            let root = match job.map.roots().as_slice() {
                [only] => *only,
                _ => {
                    return Err(Error::structural(
                        Some(op.id),
                        "right input of a merge join must come from a single load",
                    ))
                }
            };
            let file: FileSpec = job
                .map
                .node(root)?
                .load_file()
                .cloned()
                .ok_or_else(|| Error::structural(Some(op.id), "right input does not start with a load"))?;
            let mut pipeline = Vec::new();
            for id in job.map.topological_order()? {
                if id != root {
                    pipeline.push(job.map.node(id)?.clone());
                }
            }
            (root, file, pipeline)
        };

        if self.collab.loaders.supports_indexing(&file.func) {
            let upstream = self.graph.predecessors(right);
            self.graph.remove(right);
            tracing::debug!(op = %op.id, loader = %file.func, "right loader indexes natively");
            return Ok(RightSide {
                right: MergeJoinRight {
                    file,
                    index: None,
                    pipeline,
                },
                index_job: None,
                upstream,
                dropped: Some(right),
            });
        }

        if let Some(bad) = keys.iter().find(|k| !k.is_simple_projection()) {
            return Err(Error::user_input(
                Some(op.id),
                format!("merge join index needs plain column keys, found {bad:?}"),
            ));
        }

        // The right job becomes the index job: same pipeline, indexing loader,
        // keyed by the join key and sorted into one index file.
        let index_file = self.session.temp_file();
        let rearrange = Operator::new(
            self.session.op_id(),
            OpKind::LocalRearrange {
                index: 0,
                keys: keys.to_vec(),
                key_type: key_type(keys),
                mode: RearrangeMode::Keyed,
            },
        );
        let package = Operator::new(
            self.session.op_id(),
            OpKind::Package {
                num_inputs: 1,
                inner: vec![false],
                distinct: false,
            },
        );
        let sort = Operator::new(
            self.session.op_id(),
            OpKind::Sort {
                keys: vec![SortKey {
                    expr: Expr::column(0, key_type(keys)),
                    ascending: true,
                }],
                comparator: None,
                limit: None,
            },
        );
        let store_id = self.session.op_id();
        let indexer = wrap_loader("MergeJoinIndexer", &file.func, &[]);

        let job = self.job_mut(right)?;
        if let Some(OpKind::Load { file: source, .. }) = job.map.get_mut(root).map(|n| &mut n.kind) {
            source.func = indexer;
        }
        stage::append_to_open(job, rearrange)?;
        stage::close_map(job, false)?;
        stage::append_to_open(job, package)?;
        stage::append_to_open(job, sort)?;
        stage::end_with_store(job, store_id, index_file.clone(), true)?;
        job.parallelism = Some(1);
        tracing::debug!(op = %op.id, job = %right, "built merge join index job");

        Ok(RightSide {
            right: MergeJoinRight {
                file,
                index: Some(index_file),
                pipeline,
            },
            index_job: Some(right),
            upstream: vec![],
            dropped: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Collaborators;
    use crate::logical::PlanBuilder;
    use mrplan_core::config::CompilerConfig;
    use mrplan_core::dag::OperatorPlan;
    use mrplan_core::error::ErrorKind;
    use mrplan_core::schema::DataType;

    fn merge_plan() -> (OperatorPlan, OpId, OpId, OpId) {
        let mut b = PlanBuilder::new();
        let a = b.load("in/a", "PigStorage").unwrap();
        let c = b.load("in/b", "PigStorage").unwrap();
        let key = vec![Expr::column(0, DataType::Int64)];
        let j = b
            .op(
                OpKind::MergeJoin {
                    keys: vec![key.clone(), key],
                    right: None,
                },
                &[a, c],
            )
            .unwrap();
        b.store(j, "out", "PigStorage").unwrap();
        (b.build(), a, c, j)
    }

    #[test]
    fn sides_follow_the_first_predecessor() {
        let (plan, a, c, j) = merge_plan();
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        let mut builder = JobBuilder::new(&plan, &config, &collab).unwrap();
        let left = builder.input_of(a).unwrap();
        let right = builder.input_of(c).unwrap();
        let op = plan.node(j).unwrap().clone();

        assert_eq!(builder.pick_sides(&op, &[left, right], &[a, c]).unwrap(), (left, right));
        assert_eq!(builder.pick_sides(&op, &[right, left], &[a, c]).unwrap(), (left, right));
    }

    #[test]
    fn unrelated_inputs_are_structural() {
        let (plan, a, c, j) = merge_plan();
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        let mut builder = JobBuilder::new(&plan, &config, &collab).unwrap();
        let first = builder.new_job();
        let second = builder.new_job();
        let op = plan.node(j).unwrap().clone();

        assert!(!builder.leads_from(first, a).unwrap());
        let err = builder
            .pick_sides(&op, &[first, second], &[a, c])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
