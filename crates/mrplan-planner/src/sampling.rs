//! Single-reducer sampling jobs shared by order-by and skewed-join lowering.
//!
//! Both read their input through a thinning loader, project the columns of
//! interest, funnel every sample to one reducer under a constant key, sort
//! the collected bag and hand it to a summarizing function whose output is
//! written to a side file the main job reads at runtime.

use mrplan_core::error::Result;
use mrplan_core::expr::{key_type, Expr};
use mrplan_core::file::{FileSpec, FuncSpec};
use mrplan_core::id::JobId;
use mrplan_core::operator::{OpKind, Operator, Projection, RearrangeMode, SortKey};
use mrplan_core::types::Scalar;

use crate::compiler::JobBuilder;
use crate::stage;

/// Loader that wraps another loader: the wrapped name and arguments come
/// first, then `extra`.
pub fn wrap_loader(name: &str, inner: &FuncSpec, extra: &[String]) -> FuncSpec {
    let args = std::iter::once(inner.name.clone())
        .chain(inner.args.iter().cloned())
        .chain(extra.iter().cloned());
    FuncSpec::with_args(name, args)
}

pub(crate) struct SampleJob {
    /// File the sampler reads; only its path is kept.
    pub source: FileSpec,
    pub loader: FuncSpec,
    pub projection: Vec<Expr>,
    /// Order of the collected sample, over the projected columns.
    pub order: Vec<SortKey>,
    /// Summarizing expression evaluated over the sorted sample.
    pub summary: Expr,
    pub output: FileSpec,
}

impl JobBuilder<'_> {
    pub(crate) fn sampling_job(&mut self, spec: SampleJob) -> Result<JobId> {
        let temp = self.session.temps.is_temp(&spec.source);
        let load = Operator::new(
            self.session.op_id(),
            OpKind::Load {
                file: FileSpec::new(spec.source.path, spec.loader),
                schema: None,
                temp,
            },
        );
        let job = self.open_job_with(load)?;

        let project = OpKind::ForEach {
            items: spec.projection.into_iter().map(Projection::plain).collect(),
        };
        let all = vec![Expr::Const(Scalar::Str("all".into()))];
        let group_all = OpKind::LocalRearrange {
            index: 0,
            key_type: key_type(&all),
            keys: all,
            mode: RearrangeMode::Keyed,
        };
        for kind in [project, group_all] {
            let op = Operator::new(self.session.op_id(), kind);
            self.append(job, op)?;
        }
        self.close_map(job, false)?;

        let reduce = [
            OpKind::Package {
                num_inputs: 1,
                inner: vec![false],
                distinct: false,
            },
            OpKind::Sort {
                keys: spec.order,
                comparator: None,
                limit: None,
            },
            OpKind::ForEach {
                items: vec![Projection::plain(spec.summary)],
            },
        ];
        for kind in reduce {
            let op = Operator::new(self.session.op_id(), kind);
            self.append(job, op)?;
        }
        let store_id = self.session.op_id();
        let target = self.job_mut(job)?;
        stage::end_with_store(target, store_id, spec.output, true)?;
        target.parallelism = Some(1);
        target.sampler = true;
        tracing::debug!(job = %job, "built sampling job");
        Ok(job)
    }
}

/// Sort keys over the first `n` projected columns of a sample.
pub(crate) fn sample_order(keys: &[SortKey]) -> Vec<SortKey> {
    keys.iter()
        .enumerate()
        .map(|(i, k)| SortKey {
            expr: Expr::column(i, k.expr.data_type()),
            ascending: k.ascending,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_loader_keeps_inner_arguments_first() {
        let inner = FuncSpec::with_args("PigStorage", [","]);
        let wrapped = wrap_loader("RandomSampleLoader", &inner, &["100".to_string()]);
        assert_eq!(wrapped.name, "RandomSampleLoader");
        assert_eq!(wrapped.args, vec!["PigStorage", ",", "100"]);
    }

    #[test]
    fn sample_order_rebinds_to_projected_columns() {
        let keys = vec![
            SortKey {
                expr: Expr::column(4, mrplan_core::schema::DataType::Utf8),
                ascending: false,
            },
            SortKey {
                expr: Expr::column(1, mrplan_core::schema::DataType::Int64),
                ascending: true,
            },
        ];
        let order = sample_order(&keys);
        assert_eq!(
            order[0].expr,
            Expr::column(0, mrplan_core::schema::DataType::Utf8)
        );
        assert!(!order[0].ascending);
        assert_eq!(
            order[1].expr,
            Expr::column(1, mrplan_core::schema::DataType::Int64)
        );
    }
}
