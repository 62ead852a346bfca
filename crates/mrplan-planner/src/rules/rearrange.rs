//! Moves a trailing rearrange from one job's reduce stage into the map
//! stage of the job that reads its output.
//!
//! A job whose reduce stage ends in `LocalRearrange -> Store` is shipping
//! tagged rows to a next job that only loads them. Running the rearrange
//! after that load instead keeps the temp file plain.

use mrplan_core::error::{Error, Result};
use mrplan_core::id::{JobId, OpId};
use mrplan_core::job::JobGraph;
use mrplan_core::operator::OpKind;

use crate::session::Session;

/// What one candidate job offers, read before any mutation.
struct Candidate {
    rearrange: OpId,
    store_path: String,
    next: JobId,
}

pub fn adjust_rearranges(graph: &mut JobGraph, session: &mut Session) -> Result<()> {
    for id in graph.topological_order()? {
        let Some(candidate) = candidate(graph, id)? else {
            continue;
        };

        let load = {
            let next = graph.job(candidate.next)?;
            match next.map.sole_leaf() {
                Some(op)
                    if next.map.len() == 1
                        && op.load_file().map(|f| f.path.as_str())
                            == Some(candidate.store_path.as_str()) =>
                {
                    Some(op.id)
                }
                _ => None,
            }
        };
        let Some(load) = load else {
            session.warn(
                Some(candidate.rearrange),
                Some(id),
                format!(
                    "rearrange left in place: map stage of {} is not a single load",
                    candidate.next
                ),
            );
            continue;
        };

        let rearrange = graph
            .job_mut(id)?
            .reduce
            .remove_and_reconnect(candidate.rearrange)
            .ok_or_else(|| Error::structural(Some(candidate.rearrange), "rearrange vanished"))?;
        let next = graph.job_mut(candidate.next)?;
        next.udfs.extend(rearrange.udfs());
        let moved = next.map.add(rearrange)?;
        next.map.connect(load, moved)?;
        tracing::debug!(op = %moved, from = %id, to = %candidate.next, "moved rearrange downstream");
    }
    Ok(())
}

fn candidate(graph: &JobGraph, id: JobId) -> Result<Option<Candidate>> {
    let job = graph.job(id)?;
    let Some(store) = job.reduce.sole_leaf() else {
        return Ok(None);
    };
    let Some(store_file) = store.store_file() else {
        return Ok(None);
    };
    let rearrange = match job.reduce.predecessors(store.id).as_slice() {
        [only] => *only,
        _ => return Ok(None),
    };
    if !matches!(
        job.reduce.node(rearrange)?.kind,
        OpKind::LocalRearrange { .. }
    ) {
        return Ok(None);
    }
    let next = match graph.successors(id).as_slice() {
        [only] => *only,
        _ => return Ok(None),
    };
    Ok(Some(Candidate {
        rearrange,
        store_path: store_file.path.clone(),
        next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrplan_core::config::CompilerConfig;
    use mrplan_core::expr::Expr;
    use mrplan_core::file::{FileSpec, FuncSpec};
    use mrplan_core::job::Job;
    use mrplan_core::operator::{Operator, RearrangeMode};
    use mrplan_core::schema::DataType;

    fn file(p: &str) -> FileSpec {
        FileSpec::new(p, FuncSpec::new("InterStorage"))
    }

    fn rearrange(id: u64) -> Operator {
        Operator::new(
            OpId::new(id),
            OpKind::LocalRearrange {
                index: 0,
                keys: vec![Expr::Star],
                key_type: DataType::Tuple,
                mode: RearrangeMode::Keyed,
            },
        )
    }

    /// A: load -> | -> rearrange -> store(tmp); B: load(tmp) [+ extra].
    fn pair(extra_load: bool) -> JobGraph {
        let mut a = Job::new(JobId::new(0));
        a.map.add(Operator::load(OpId::new(1), file("in"))).unwrap();
        a.map_closed = true;
        a.reduce.add(rearrange(2)).unwrap();
        a.reduce.add_as_leaf(Operator::temp_store(OpId::new(3), file("tmp"))).unwrap();
        a.reduce_closed = true;

        let mut b = Job::new(JobId::new(1));
        b.map.add(Operator::temp_load(OpId::new(4), file("tmp"))).unwrap();
        if extra_load {
            b.map.add(Operator::load(OpId::new(5), file("other"))).unwrap();
        }
        b.map_closed = true;
        b.reduce.add(Operator::store(OpId::new(6), file("out"))).unwrap();
        b.reduce_closed = true;

        let mut graph = JobGraph::new();
        graph.add(a);
        graph.add(b);
        graph.connect(JobId::new(0), JobId::new(1)).unwrap();
        graph
    }

    #[test]
    fn rearrange_moves_after_the_downstream_load() {
        let mut graph = pair(false);
        let mut session = Session::new(&CompilerConfig::default(), Some(OpId::new(6)));
        adjust_rearranges(&mut graph, &mut session).unwrap();

        let a = graph.job(JobId::new(0)).unwrap();
        assert_eq!(a.reduce.len(), 1);
        assert!(a.reduce.sole_leaf().unwrap().is_store());
        let b = graph.job(JobId::new(1)).unwrap();
        assert_eq!(b.map.successors(OpId::new(4)), vec![OpId::new(2)]);
        assert!(session.warnings.is_empty());
    }

    #[test]
    fn busy_downstream_map_is_left_alone_with_a_warning() {
        let mut graph = pair(true);
        let before = graph.clone();
        let mut session = Session::new(&CompilerConfig::default(), Some(OpId::new(6)));
        adjust_rearranges(&mut graph, &mut session).unwrap();
        assert_eq!(graph, before);
        assert_eq!(session.warnings.len(), 1);
        assert_eq!(session.warnings[0].op, Some(OpId::new(2)));
    }
}
