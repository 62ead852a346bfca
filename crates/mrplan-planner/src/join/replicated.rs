//! Broadcast join: input 0 is the fragment, every other input is written
//! to a temp file and loaded whole into each fragment task.

use mrplan_core::error::{Error, Result};
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator};
use mrplan_core::schema::Schema;

use super::{check_key_lists, join_key_type};
use crate::compiler::JobBuilder;

impl JobBuilder<'_> {
    pub(crate) fn compile_replicated_join(
        &mut self,
        op: Operator,
        preds: &[OpId],
    ) -> Result<JobId> {
        let OpKind::ReplicatedJoin {
            keys,
            left_outer,
            schemas,
            ..
        } = &op.kind
        else {
            return Err(Error::structural(Some(op.id), "not a ReplicatedJoin"));
        };
        if preds.len() < 2 {
            return Err(Error::structural(
                Some(op.id),
                format!("replicated join needs at least two inputs, found {}", preds.len()),
            ));
        }
        check_key_lists(&op, keys, preds.len())?;
        join_key_type(&op, keys)?;

        let null_tuple_arity = if *left_outer {
            if preds.len() != 2 {
                return Err(Error::user_input(
                    Some(op.id),
                    "replicated left outer join supports exactly two inputs",
                ));
            }
            let arity = schemas
                .get(1)
                .and_then(|s| s.as_ref())
                .map(Schema::len)
                .ok_or_else(|| {
                    Error::user_input(
                        Some(op.id),
                        "replicated left outer join needs the schema of the broadcast input",
                    )
                })?;
            Some(arity)
        } else {
            None
        };

        let inputs = self.inputs(preds)?;
        let fragment = inputs[0];
        let mut replicas = vec![None; inputs.len()];
        for (i, broadcast) in inputs.iter().enumerate().skip(1) {
            let file = self.materialize(*broadcast)?;
            replicas[i] = Some(file);
            self.graph.connect(*broadcast, fragment)?;
        }

        let mut joined = op.clone();
        if let OpKind::ReplicatedJoin {
            replicas: slots,
            null_tuple_arity: arity,
            ..
        } = &mut joined.kind
        {
            *slots = replicas;
            *arity = null_tuple_arity;
        }
        self.append(fragment, joined)?;
        tracing::debug!(
            op = %op.id,
            job = %fragment,
            broadcast = inputs.len() - 1,
            "lowered replicated join"
        );
        Ok(fragment)
    }
}
