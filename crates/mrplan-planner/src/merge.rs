//! Fusing several input jobs into the one job whose shuffle they share.
//!
//! A job provides exactly one shuffle, so every map-phase ancestor of an
//! operator with several inputs has to end up in the same job's map stage.
//! Inputs whose map stage is already closed cannot be fused; they are
//! bridged into the fused job through a temp file instead.

use mrplan_core::error::{Error, Result};
use mrplan_core::id::JobId;
use mrplan_core::operator::Operator;

use crate::compiler::JobBuilder;
use crate::stage::Stage;

/// Outcome of [`JobBuilder::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    /// Map-open job holding every fusable input.
    pub job: JobId,
    /// Inputs with the map closed and the reduce open, left to the caller.
    pub reduce_open: Vec<JobId>,
}

impl JobBuilder<'_> {
    /// Fuse the map-open inputs. A single map-open input is returned as is,
    /// keeping its identity, functions and parallelism.
    pub fn merge(&mut self, inputs: &[JobId]) -> Result<Merged> {
        let mut unique: Vec<JobId> = Vec::with_capacity(inputs.len());
        for id in inputs {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }

        let mut map_open = Vec::new();
        let mut reduce_open = Vec::new();
        for id in unique {
            match self.stage_of(id)? {
                Stage::MapOpen => map_open.push(id),
                Stage::ReduceOpen => reduce_open.push(id),
                Stage::Finished => {
                    return Err(Error::structural(
                        None,
                        format!("cannot merge {id}: both stages closed"),
                    ))
                }
            }
        }

        let job = match map_open.as_slice() {
            [only] => *only,
            _ => self.fuse(&map_open)?,
        };
        Ok(Merged { job, reduce_open })
    }

    fn fuse(&mut self, jobs: &[JobId]) -> Result<JobId> {
        let fused = self.new_job();
        for id in jobs {
            let preds = self.graph.predecessors(*id);
            let succs = self.graph.successors(*id);
            let old = self
                .graph
                .remove(*id)
                .ok_or_else(|| Error::structural(None, format!("{id} vanished during merge")))?;
            let target = self.job_mut(fused)?;
            target.map.splice(old.map)?;
            target.parallelism = match (target.parallelism, old.parallelism) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            target.udfs.extend(old.udfs);
            for p in preds {
                self.graph.connect(p, fused)?;
            }
            for s in succs {
                self.graph.connect(fused, s)?;
            }
            self.retarget_owners(*id, fused);
        }
        tracing::debug!(job = %fused, fused = jobs.len(), "fused map stages");
        Ok(fused)
    }

    /// Merge, then bridge every reduce-open input into the fused map stage
    /// with a temp store on its side and a temp load on the fused side.
    pub fn merge_and_bridge(&mut self, inputs: &[JobId]) -> Result<JobId> {
        let Merged { job, reduce_open } = self.merge(inputs)?;
        for producer in reduce_open {
            let file = self.materialize(producer)?;
            let load = Operator::temp_load(self.session.op_id(), file);
            let target = self.job_mut(job)?;
            target.udfs.extend(load.udfs());
            target.map.add(load)?;
            self.graph.connect(producer, job)?;
            tracing::debug!(from = %producer, to = %job, "bridged reduce-open input");
        }
        Ok(job)
    }
}
