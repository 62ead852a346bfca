//! Skewed join: a sampling job estimates per-key fanout, then input 1
//! scatters hot keys across several reducers while input 0 is routed
//! normally.

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::Expr;
use mrplan_core::file::FuncSpec;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator, RearrangeMode, SortKey};
use mrplan_core::schema::DataType;
use mrplan_core::types::Scalar;

use super::{check_key_lists, join_key_type, join_package, join_projection};
use crate::compiler::{tail_of, JobBuilder};
use crate::sampling::{sample_order, wrap_loader, SampleJob};
use crate::stage::Stage;

impl JobBuilder<'_> {
    pub(crate) fn compile_skewed_join(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let OpKind::SkewedJoin {
            keys,
            outer,
            schemas,
        } = &op.kind
        else {
            return Err(Error::structural(Some(op.id), "not a SkewedJoin"));
        };
        if preds.len() != 2 {
            return Err(Error::structural(
                Some(op.id),
                format!("skewed join needs exactly two inputs, found {}", preds.len()),
            ));
        }
        check_key_lists(&op, keys, 2)?;
        let key_type = join_key_type(&op, keys)?;
        let projection = join_projection(&op, 2, outer, schemas)?;

        // Input 0 is read twice (sampler and join), so it goes to a file.
        let left = self.input_of(preds[0])?;
        let left_file = self.materialize(left)?;

        let sample_rate = i64::try_from(self.config.skew_sample_rate).map_err(|_| {
            Error::Config(format!(
                "skew_sample_rate {} does not fit a 64-bit signed constant",
                self.config.skew_sample_rate
            ))
        })?;

        let partition_file = self.session.temp_file();
        let mut sampled: Vec<Expr> = keys[0].clone();
        sampled.push(Expr::RowSize);
        let order: Vec<SortKey> = keys[0]
            .iter()
            .map(|k| SortKey {
                expr: k.clone(),
                ascending: true,
            })
            .collect();
        let sampler = self.sampling_job(SampleJob {
            source: left_file.clone(),
            loader: wrap_loader(
                "PoissonSampleLoader",
                &left_file.func,
                &[self.config.skew_sample_rate.to_string()],
            ),
            projection: sampled,
            order: sample_order(&order),
            summary: Expr::Udf {
                func: FuncSpec::new("PartitionSkewedKeys"),
                args: vec![
                    Expr::Const(Scalar::F64(self.config.skew_memory_fraction)),
                    Expr::Const(Scalar::I64(sample_rate)),
                    Expr::InputBag { input: 0 },
                ],
                return_type: DataType::Map,
            },
            output: partition_file.clone(),
        })?;
        self.graph.connect(left, sampler)?;

        let reload = Operator::temp_load(self.session.op_id(), left_file);
        let left_job = self.open_job_with(reload)?;
        self.graph.connect(left, left_job)?;
        let keyed = Operator::new(
            self.session.op_id(),
            OpKind::LocalRearrange {
                index: 0,
                keys: keys[0].clone(),
                key_type,
                mode: RearrangeMode::Keyed,
            },
        );
        self.append(left_job, keyed)?;

        let mut right_job = self.input_of(preds[1])?;
        if self.stage_of(right_job)? != Stage::MapOpen {
            right_job = self.bridge(right_job)?;
        }
        let scatter = Operator::new(
            self.session.op_id(),
            OpKind::LocalRearrange {
                index: 1,
                keys: keys[1].clone(),
                key_type,
                mode: RearrangeMode::Scatter {
                    partition_file: partition_file.clone(),
                },
            },
        );
        self.append(right_job, scatter)?;

        let job = self.merge_and_bridge(&[left_job, right_job])?;
        self.close_map(job, true)?;
        let package = Operator::new(self.session.op_id(), join_package(2, outer));
        self.append(job, package)?;
        self.append(job, tail_of(&op, projection))?;
        self.graph.connect(sampler, job)?;

        let fanout = match self.config.skew_reducers {
            Some(pinned) => pinned,
            None => {
                let cluster = self.config.cluster_reducers().ok();
                match self.collab.partitions.fanout(op.parallelism, cluster) {
                    Some(n) => n,
                    None => self.default_reducers(op.id, Some(job)),
                }
            }
        };
        let target = self.job_mut(job)?;
        target.skewed_join = true;
        target.skew_partition_file = Some(partition_file);
        target.parallelism = Some(fanout);
        tracing::debug!(op = %op.id, job = %job, sampler = %sampler, fanout, "lowered skewed join");
        Ok(job)
    }
}
