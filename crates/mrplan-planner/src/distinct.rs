//! Distinct: whole-row keyed shuffle whose package collapses duplicates.

use mrplan_core::error::Result;
use mrplan_core::expr::Expr;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator, RearrangeMode};
use mrplan_core::schema::DataType;

use crate::compiler::{flatten_bags, single_input, tail_of, JobBuilder};

impl JobBuilder<'_> {
    pub(crate) fn compile_distinct(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let pred = single_input(&op, preds)?;
        let input = self.input_of(pred)?;
        let rearrange = Operator::new(
            self.session.op_id(),
            OpKind::LocalRearrange {
                index: 0,
                keys: vec![Expr::Star],
                key_type: DataType::Tuple,
                mode: RearrangeMode::Distinct,
            },
        );
        self.append(input, rearrange)?;
        let job = self.close_boundary(input)?;

        let package = Operator::new(
            self.session.op_id(),
            OpKind::Package {
                num_inputs: 1,
                inner: vec![false],
                distinct: true,
            },
        );
        self.append(job, package)?;
        // The group key is the row itself.
        self.append(
            job,
            tail_of(&op, flatten_bags(vec![Expr::column(0, DataType::Tuple)])),
        )?;
        self.job_mut(job)?.needs_distinct_combiner = true;
        Ok(job)
    }
}
