//! Limit placement.
//!
//! In the map stage the limit trims each task's output and a one-reducer
//! shuffle re-trims the concatenation. In the reduce stage it trims each
//! reducer; `rules::limit` adds the final single-reducer trim afterwards.

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::Expr;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator, RearrangeMode};
use mrplan_core::schema::DataType;

use crate::compiler::{flatten_bags, single_input, JobBuilder};
use crate::stage::Stage;

impl JobBuilder<'_> {
    pub(crate) fn compile_limit(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let OpKind::Limit { count } = op.kind else {
            return Err(Error::structural(Some(op.id), "not a Limit"));
        };
        let pred = single_input(&op, preds)?;
        let job = self.input_of(pred)?;
        let reduce_empty = self.graph.job(job)?.reduce.is_empty();

        match self.stage_of(job)? {
            Stage::MapOpen if reduce_empty => {
                self.append(job, op)?;
                let rearrange = OpKind::LocalRearrange {
                    index: 0,
                    keys: vec![Expr::Star],
                    key_type: DataType::Tuple,
                    mode: RearrangeMode::Keyed,
                };
                let rearrange = Operator::new(self.session.op_id(), rearrange);
                self.append(job, rearrange)?;
                self.close_map(job, false)?;
                let tail = [
                    OpKind::Package {
                        num_inputs: 1,
                        inner: vec![false],
                        distinct: false,
                    },
                    flatten_bags(vec![Expr::InputBag { input: 0 }]),
                    OpKind::Limit { count },
                ];
                for kind in tail {
                    let step = Operator::new(self.session.op_id(), kind);
                    self.append(job, step)?;
                }
                self.job_mut(job)?.parallelism = Some(1);
            }
            Stage::MapOpen => {
                self.session.warn(
                    Some(op.id),
                    Some(job),
                    "reduce content observed while map still open",
                );
                self.close_map(job, false)?;
                self.append(job, op)?;
            }
            Stage::ReduceOpen => {
                self.append(job, op)?;
            }
            Stage::Finished => {
                return Err(Error::structural(
                    Some(op.id),
                    "limit requested after job fully compiled",
                ))
            }
        }

        let target = self.job_mut(job)?;
        target.limit = Some(target.limit.map_or(count, |cur| cur.min(count)));
        Ok(job)
    }
}
