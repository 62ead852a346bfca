//! N-way hash join over one shuffle.

use mrplan_core::error::{Error, Result};
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator, RearrangeMode};

use super::{check_key_lists, join_key_type, join_package, join_projection};
use crate::compiler::{tail_of, JobBuilder};

impl JobBuilder<'_> {
    pub(crate) fn compile_hash_join(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let OpKind::HashJoin {
            keys,
            outer,
            schemas,
        } = &op.kind
        else {
            return Err(Error::structural(Some(op.id), "not a HashJoin"));
        };
        if preds.len() < 2 {
            return Err(Error::structural(
                Some(op.id),
                format!("hash join needs at least two inputs, found {}", preds.len()),
            ));
        }
        check_key_lists(&op, keys, preds.len())?;
        let key_type = join_key_type(&op, keys)?;
        let projection = join_projection(&op, preds.len(), outer, schemas)?;

        let mut inputs = Vec::with_capacity(preds.len());
        for (index, pred) in preds.iter().enumerate() {
            let job = self.input_of(*pred)?;
            let rearrange = Operator::new(
                self.session.op_id(),
                OpKind::LocalRearrange {
                    index,
                    keys: keys[index].clone(),
                    key_type,
                    mode: RearrangeMode::Keyed,
                },
            );
            self.append(job, rearrange)?;
            inputs.push(job);
        }

        let job = self.merge_and_bridge(&inputs)?;
        self.close_map(job, true)?;
        let package = Operator::new(self.session.op_id(), join_package(preds.len(), outer));
        self.append(job, package)?;
        self.append(job, tail_of(&op, projection))?;
        tracing::debug!(op = %op.id, job = %job, inputs = preds.len(), "lowered hash join");
        Ok(job)
    }
}
