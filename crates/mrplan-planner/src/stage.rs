//! Which stage of a job accepts the next operator.
//!
//! A job starts map-open. Closing the map stage opens the reduce stage (the
//! shuffle sits between them and is never a plan node). A `Store` ends
//! whichever stage it lands in; a job with both stages closed accepts
//! nothing further.

use mrplan_core::error::{Error, Result};
use mrplan_core::file::FileSpec;
use mrplan_core::id::OpId;
use mrplan_core::job::Job;
use mrplan_core::operator::Operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MapOpen,
    ReduceOpen,
    Finished,
}

pub fn open_stage(job: &Job) -> Stage {
    if !job.map_closed {
        Stage::MapOpen
    } else if !job.reduce_closed {
        Stage::ReduceOpen
    } else {
        Stage::Finished
    }
}

/// Append `op` below the leaves of the open stage and record its functions.
///
/// A store in the map stage finishes the job as map-only; a store in the
/// reduce stage closes the reduce stage.
pub fn append_to_open(job: &mut Job, op: Operator) -> Result<OpId> {
    let is_store = op.is_store();
    let op_id = op.id;
    job.udfs.extend(op.udfs());
    match open_stage(job) {
        Stage::MapOpen => {
            job.map.add_as_leaf(op)?;
            if is_store {
                job.map_closed = true;
                job.reduce_closed = true;
            }
        }
        Stage::ReduceOpen => {
            job.reduce.add_as_leaf(op)?;
            if is_store {
                job.reduce_closed = true;
            }
        }
        Stage::Finished => {
            return Err(Error::structural(
                Some(op_id),
                format!("cannot place operator in {}: both stages closed", job.id),
            ))
        }
    }
    Ok(op_id)
}

/// End the open stage with a store to `file`.
pub fn end_with_store(job: &mut Job, id: OpId, file: FileSpec, temp: bool) -> Result<OpId> {
    let store = if temp {
        Operator::temp_store(id, file)
    } else {
        Operator::store(id, file)
    };
    append_to_open(job, store)
}

/// Close the map stage; `multi` marks a shuffle fed by several branches.
pub fn close_map(job: &mut Job, multi: bool) -> Result<()> {
    if job.map_closed {
        return Err(Error::structural(
            None,
            format!("map stage of {} is already closed", job.id),
        ));
    }
    job.map_closed = true;
    job.multi_input_shuffle = multi;
    Ok(())
}

/// Leaf of the open stage, if it has exactly one.
pub fn open_leaf(job: &Job) -> Option<&Operator> {
    match open_stage(job) {
        Stage::MapOpen => job.map.sole_leaf(),
        Stage::ReduceOpen if job.reduce.is_empty() => job.map.sole_leaf(),
        Stage::ReduceOpen => job.reduce.sole_leaf(),
        Stage::Finished => None,
    }
}
