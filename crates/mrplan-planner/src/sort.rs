//! Global order-by: a quantile sampling job followed by a range-partitioned
//! sort job.

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::{key_type, Expr};
use mrplan_core::file::FuncSpec;
use mrplan_core::id::{JobId, OpId};
use mrplan_core::operator::{OpKind, Operator, RearrangeMode};
use mrplan_core::schema::DataType;
use mrplan_core::types::Scalar;

use crate::compiler::{flatten_bags, single_input, tail_of, JobBuilder};
use crate::sampling::{sample_order, wrap_loader, SampleJob};
use crate::stage::Stage;

impl JobBuilder<'_> {
    pub(crate) fn compile_sort(&mut self, op: Operator, preds: &[OpId]) -> Result<JobId> {
        let OpKind::Sort {
            keys,
            comparator,
            limit,
        } = &op.kind
        else {
            return Err(Error::structural(Some(op.id), "not a Sort"));
        };
        if keys.is_empty() {
            return Err(Error::structural(Some(op.id), "Sort has no keys"));
        }
        let pred = single_input(&op, preds)?;
        let input = self.input_of(pred)?;

        // A map-open job that only loads a file can read it directly and
        // become the sort job itself.
        let map_open = self.stage_of(input)? == Stage::MapOpen;
        let reusable = {
            let job = self.graph.job(input)?;
            match job.map.sole_leaf() {
                Some(load) if map_open && job.map.len() == 1 && job.reduce.is_empty() => {
                    load.load_file().cloned()
                }
                _ => None,
            }
        };
        let (sort_job, source, upstream) = match reusable {
            Some(file) => (input, file, self.graph.predecessors(input)),
            None => {
                let file = self.materialize(input)?;
                let load = Operator::temp_load(self.session.op_id(), file.clone());
                let fresh = self.open_job_with(load)?;
                self.graph.connect(input, fresh)?;
                (fresh, file, vec![input])
            }
        };

        let parallelism = match op.parallelism {
            Some(p) => p,
            None => self.default_reducers(op.id, Some(sort_job)),
        };
        let quantiles = self.session.temp_file();
        let sample_size = self.config.sort_sample_size.to_string();
        let sampler = self.sampling_job(SampleJob {
            loader: wrap_loader("RandomSampleLoader", &source.func, &[sample_size]),
            source,
            projection: keys.iter().map(|k| k.expr.clone()).collect(),
            order: sample_order(keys),
            summary: Expr::Udf {
                func: FuncSpec::new("FindQuantiles"),
                args: vec![
                    Expr::Const(Scalar::I64(parallelism as i64)),
                    Expr::InputBag { input: 0 },
                ],
                return_type: DataType::Bag,
            },
            output: quantiles.clone(),
        })?;
        for producer in upstream {
            self.graph.connect(producer, sampler)?;
        }

        let key_exprs: Vec<Expr> = keys.iter().map(|k| k.expr.clone()).collect();
        let rearrange = Operator::new(
            self.session.op_id(),
            OpKind::LocalRearrange {
                index: 0,
                key_type: key_type(&key_exprs),
                keys: key_exprs,
                mode: RearrangeMode::Keyed,
            },
        );
        self.append(sort_job, rearrange.clone())?;
        self.close_map(sort_job, false)?;
        let package = OpKind::Package {
            num_inputs: 1,
            inner: vec![false],
            distinct: false,
        };
        let package_op = Operator::new(self.session.op_id(), package.clone());
        self.append(sort_job, package_op)?;
        self.append(
            sort_job,
            tail_of(&op, flatten_bags(vec![Expr::InputBag { input: 0 }])),
        )?;

        if let Some(count) = *limit {
            // Per-partition pre-trim: each map task ships at most `count` rows.
            let combine = [
                Operator::new(self.session.op_id(), package),
                Operator::new(
                    self.session.op_id(),
                    flatten_bags(vec![Expr::InputBag { input: 0 }]),
                ),
                Operator::new(self.session.op_id(), OpKind::Limit { count }),
                Operator {
                    id: self.session.op_id(),
                    ..rearrange
                },
            ];
            let trimmed = Operator::new(self.session.op_id(), OpKind::Limit { count });
            let job = self.job_mut(sort_job)?;
            for step in combine {
                job.udfs.extend(step.udfs());
                job.combine.add_as_leaf(step)?;
            }
            self.append(sort_job, trimmed)?;
        }

        let job = self.job_mut(sort_job)?;
        job.global_sort = true;
        job.quantile_file = Some(quantiles);
        job.sort_order = keys.iter().map(|k| k.ascending).collect();
        job.udfs.extend(comparator.iter().cloned());
        job.parallelism = Some(parallelism);
        if let Some(count) = *limit {
            job.limit = Some(job.limit.map_or(count, |cur| cur.min(count)));
        }
        self.graph.connect(sampler, sort_job)?;
        tracing::debug!(
            op = %op.id,
            sampler = %sampler,
            sort = %sort_job,
            parallelism,
            "lowered order-by"
        );
        Ok(sort_job)
    }
}

#[cfg(test)]
mod tests {
    use crate::capability::Collaborators;
    use crate::compiler::JobBuilder;
    use crate::logical::PlanBuilder;
    use mrplan_core::config::CompilerConfig;
    use mrplan_core::expr::Expr;
    use mrplan_core::operator::{OpKind, SortKey};
    use mrplan_core::schema::DataType;

    fn sort_kind(limit: Option<u64>) -> OpKind {
        OpKind::Sort {
            keys: vec![SortKey {
                expr: Expr::column(1, DataType::Int64),
                ascending: false,
            }],
            comparator: None,
            limit,
        }
    }

    #[test]
    fn unknown_reducer_count_falls_back_to_one_with_a_warning() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let s = b.op(sort_kind(None), &[l]).unwrap();
        b.store(s, "out", "PigStorage").unwrap();
        let plan = b.build();
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        let (graph, session) = JobBuilder::new(&plan, &config, &collab)
            .unwrap()
            .build()
            .unwrap();
        let sort = graph.jobs().find(|j| j.global_sort).unwrap();
        assert_eq!(sort.parallelism, Some(1));
        assert_eq!(sort.sort_order, vec![false]);
        assert_eq!(session.warnings.len(), 1);
    }

    #[test]
    fn filtered_input_is_materialized_first() {
        let mut b = PlanBuilder::new();
        let l = b.load("in", "PigStorage").unwrap();
        let f = b
            .op(
                OpKind::Filter {
                    predicate: Expr::Star,
                },
                &[l],
            )
            .unwrap();
        let s = b.op(sort_kind(Some(5)), &[f]).unwrap();
        b.store(s, "out", "PigStorage").unwrap();
        b.set_parallelism(s, 4).unwrap();
        let plan = b.build();
        let config = CompilerConfig::default();
        let collab = Collaborators::default();
        let (graph, session) = JobBuilder::new(&plan, &config, &collab)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.len(), 3);
        assert!(session.warnings.is_empty());
        let sort = graph.jobs().find(|j| j.global_sort).unwrap();
        assert_eq!(sort.limit, Some(5));
        assert_eq!(sort.parallelism, Some(4));
        assert_eq!(sort.combine.len(), 4);
        assert_eq!(graph.predecessors(sort.id).len(), 2);
    }
}
