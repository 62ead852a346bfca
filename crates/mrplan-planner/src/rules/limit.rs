//! Adds the final single-reducer trim to limited jobs with several reducers.
//!
//! Each of P reducers keeps up to L rows, so the job's output can hold P*L
//! rows. The job now writes to a temp file and a new one-reducer job reads
//! it, applies the limit once more and writes the original target.

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::{key_type, Expr};
use mrplan_core::id::{JobId, OpId};
use mrplan_core::job::{Job, JobGraph};
use mrplan_core::operator::{OpKind, Operator, Projection, RearrangeMode};

use crate::session::Session;
use crate::stage;

pub fn adjust_limits(graph: &mut JobGraph, session: &mut Session) -> Result<()> {
    let limited: Vec<JobId> = graph
        .jobs()
        .filter(|j| j.limit.is_some() && j.parallelism != Some(1) && !j.reduce.is_empty())
        .map(|j| j.id)
        .collect();
    for id in limited {
        let trim = split_limited_job(graph, session, id)?;
        tracing::debug!(job = %id, trim = %trim, "added single-reducer limit job");
    }
    Ok(())
}

fn split_limited_job(graph: &mut JobGraph, session: &mut Session, id: JobId) -> Result<JobId> {
    let (limit, store, sort_keys, tail, sort_order) = {
        let job = graph.job(id)?;
        let limit = job
            .limit
            .ok_or_else(|| Error::structural(None, format!("{id} has no limit")))?;
        let store = job
            .reduce
            .sole_leaf()
            .filter(|op| op.is_store())
            .cloned()
            .ok_or_else(|| {
                Error::structural(None, format!("limited {id} does not end in a single store"))
            })?;
        let (sort_keys, tail) = if job.global_sort {
            (sort_keys(job), ops_between_limit_and(job, store.id)?)
        } else {
            (None, vec![])
        };
        (limit, store, sort_keys, tail, job.sort_order.clone())
    };
    // Old job: drop the ordering-sensitive tail, write to a temp file.
    let temp = session.temp_file();
    let temp_store = Operator::temp_store(session.op_id(), temp.clone());
    let old = graph.job_mut(id)?;
    let mut moved = Vec::with_capacity(tail.len());
    for op in &tail {
        moved.push(
            old.reduce
                .remove_and_reconnect(*op)
                .ok_or_else(|| Error::structural(Some(*op), "tail operator vanished"))?,
        );
    }
    old.reduce.remove(store.id);
    old.reduce.add_as_leaf(temp_store)?;

    // New job: load -> rearrange -> | -> package -> flatten -> limit -> tail -> store.
    let trim = session.job_id();
    let mut job = Job::new(trim);
    stage::append_to_open(&mut job, Operator::temp_load(session.op_id(), temp))?;
    let keys = sort_keys.unwrap_or_else(|| vec![Expr::Star]);
    let rearrange = OpKind::LocalRearrange {
        index: 0,
        key_type: key_type(&keys),
        keys,
        mode: RearrangeMode::Keyed,
    };
    stage::append_to_open(&mut job, Operator::new(session.op_id(), rearrange))?;
    stage::close_map(&mut job, false)?;
    let reduce = [
        OpKind::Package {
            num_inputs: 1,
            inner: vec![false],
            distinct: false,
        },
        OpKind::ForEach {
            items: vec![Projection::flattened(Expr::InputBag { input: 0 })],
        },
        OpKind::Limit { count: limit },
    ];
    for kind in reduce {
        stage::append_to_open(&mut job, Operator::new(session.op_id(), kind))?;
    }
    for op in moved {
        stage::append_to_open(&mut job, op)?;
    }
    stage::append_to_open(&mut job, store)?;
    job.parallelism = Some(1);
    job.limit = Some(limit);
    job.sort_order = sort_order;
    graph.add(job);

    for succ in graph.successors(id) {
        graph.disconnect(id, succ);
        graph.connect(trim, succ)?;
    }
    graph.connect(id, trim)?;
    Ok(trim)
}

/// Sort keys of a global sort job: the keys of its map-side rearrange.
fn sort_keys(job: &Job) -> Option<Vec<Expr>> {
    job.map.operators().find_map(|op| match &op.kind {
        OpKind::LocalRearrange { keys, .. } => Some(keys.clone()),
        _ => None,
    })
}

/// Reduce operators strictly between the last `Limit` and `store`, in order.
fn ops_between_limit_and(job: &Job, store: OpId) -> Result<Vec<OpId>> {
    let order = job.reduce.topological_order()?;
    let Some(limit) = order
        .iter()
        .rev()
        .find(|id| matches!(job.reduce.get(**id).map(|op| &op.kind), Some(OpKind::Limit { .. })))
    else {
        return Ok(vec![]);
    };
    let mut tail = Vec::new();
    let mut current = *limit;
    loop {
        match job.reduce.successors(current).as_slice() {
            [next] if *next == store => return Ok(tail),
            [next] => {
                tail.push(*next);
                current = *next;
            }
            _ => {
                return Err(Error::structural(
                    Some(current),
                    "reduce stage after a limit is not a single chain",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrplan_core::config::CompilerConfig;
    use mrplan_core::file::{FileSpec, FuncSpec};
    use mrplan_core::schema::DataType;

    fn file(p: &str) -> FileSpec {
        FileSpec::new(p, FuncSpec::new("PigStorage"))
    }

    fn limited_job(global_sort: bool) -> JobGraph {
        let mut job = Job::new(JobId::new(0));
        job.map.add(Operator::load(OpId::new(1), file("in"))).unwrap();
        job.map
            .add_as_leaf(Operator::new(
                OpId::new(2),
                OpKind::LocalRearrange {
                    index: 0,
                    keys: vec![Expr::column(0, DataType::Int64)],
                    key_type: DataType::Int64,
                    mode: RearrangeMode::Keyed,
                },
            ))
            .unwrap();
        job.map_closed = true;
        for (id, kind) in [
            (
                3,
                OpKind::Package {
                    num_inputs: 1,
                    inner: vec![false],
                    distinct: false,
                },
            ),
            (4, OpKind::Limit { count: 10 }),
            (
                5,
                OpKind::ForEach {
                    items: vec![Projection::plain(Expr::column(1, DataType::Utf8))],
                },
            ),
        ] {
            job.reduce.add_as_leaf(Operator::new(OpId::new(id), kind)).unwrap();
        }
        job.reduce.add_as_leaf(Operator::store(OpId::new(6), file("out"))).unwrap();
        job.reduce_closed = true;
        job.limit = Some(10);
        job.parallelism = Some(4);
        job.global_sort = global_sort;
        job.sort_order = vec![true];

        let mut graph = JobGraph::new();
        graph.add(job);
        graph
    }

    #[test]
    fn sorted_tail_moves_into_the_trim_job() {
        let mut graph = limited_job(true);
        let mut session = Session::new(&CompilerConfig::default(), Some(OpId::new(6)));
        adjust_limits(&mut graph, &mut session).unwrap();
        assert_eq!(graph.len(), 2);

        let old = graph.job(JobId::new(0)).unwrap();
        assert!(!old.reduce.contains(OpId::new(5)));
        let temp = old.reduce.sole_leaf().unwrap().store_file().unwrap().clone();
        assert!(session.temps.is_temp(&temp));

        let trim_id = graph.successors(JobId::new(0))[0];
        let trim = graph.job(trim_id).unwrap();
        assert_eq!(trim.parallelism, Some(1));
        assert!(trim.reduce.contains(OpId::new(5)));
        assert_eq!(trim.reduce.sole_leaf().unwrap().store_file(), Some(&file("out")));
        assert_eq!(trim.map.roots().len(), 1);
        let keyed_by_sort_key = trim.map.operators().any(|op| {
            matches!(&op.kind, OpKind::LocalRearrange { key_type: DataType::Int64, .. })
        });
        assert!(keyed_by_sort_key);
    }

    #[test]
    fn unsorted_tail_stays_behind() {
        let mut graph = limited_job(false);
        let mut session = Session::new(&CompilerConfig::default(), Some(OpId::new(6)));
        adjust_limits(&mut graph, &mut session).unwrap();
        let old = graph.job(JobId::new(0)).unwrap();
        assert!(old.reduce.contains(OpId::new(5)));
    }

    #[test]
    fn single_reducer_jobs_are_untouched() {
        let mut graph = limited_job(true);
        graph.job_mut(JobId::new(0)).unwrap().parallelism = Some(1);
        let before = graph.clone();
        let mut session = Session::new(&CompilerConfig::default(), Some(OpId::new(6)));
        adjust_limits(&mut graph, &mut session).unwrap();
        assert_eq!(graph, before);
    }
}
