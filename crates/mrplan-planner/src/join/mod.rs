//! Join lowering. The strategy is chosen by the input plan; each one has
//! its own module:
//!
//! - `hash`: N-way shuffle join, one rearrange per input.
//! - `replicated`: broadcast every non-fragment input to the fragment's job.
//! - `skewed`: two-way shuffle join with a sampling job that fans hot keys
//!   of the second input across several reducers.
//! - `merge`: sort-merge join of two pre-sorted inputs, no shuffle.

pub mod hash;
pub mod merge;
pub mod replicated;
pub mod skewed;

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::{key_type, Expr};
use mrplan_core::operator::{OpKind, Operator, Projection};
use mrplan_core::schema::{DataType, Schema};

/// Key type shared by every input's key list; inputs must agree.
pub(crate) fn join_key_type(op: &Operator, keys: &[Vec<Expr>]) -> Result<DataType> {
    let mut types = keys.iter().map(|k| key_type(k));
    let first = types
        .next()
        .ok_or_else(|| Error::structural(Some(op.id), "join has no key lists"))?;
    for (i, t) in types.enumerate() {
        if t != first {
            return Err(Error::user_input(
                Some(op.id),
                format!(
                    "join key of input {} is {t:?} but input 0 uses {first:?}",
                    i + 1
                ),
            ));
        }
    }
    Ok(first)
}

pub(crate) fn check_key_lists(op: &Operator, keys: &[Vec<Expr>], inputs: usize) -> Result<()> {
    if keys.len() != inputs {
        return Err(Error::structural(
            Some(op.id),
            format!("{} has {inputs} inputs but {} key lists", op.name(), keys.len()),
        ));
    }
    Ok(())
}

/// Reduce-side package for a shuffle join: a group survives unless an inner
/// input contributed nothing.
pub(crate) fn join_package(inputs: usize, outer: &[bool]) -> OpKind {
    OpKind::Package {
        num_inputs: inputs,
        inner: (0..inputs)
            .map(|i| !outer.get(i).copied().unwrap_or(false))
            .collect(),
        distinct: false,
    }
}

/// Flattening projection over the packaged bags. Outer inputs pad an empty
/// bag with one null tuple sized from their schema.
pub(crate) fn join_projection(
    op: &Operator,
    inputs: usize,
    outer: &[bool],
    schemas: &[Option<Schema>],
) -> Result<OpKind> {
    let mut items = Vec::with_capacity(inputs);
    for input in 0..inputs {
        let expr = if outer.get(input).copied().unwrap_or(false) {
            let arity = schemas
                .get(input)
                .and_then(|s| s.as_ref())
                .map(Schema::len)
                .ok_or_else(|| {
                    Error::user_input(
                        Some(op.id),
                        format!("outer join input {input} has no schema to size null padding"),
                    )
                })?;
            Expr::PaddedBag { input, arity }
        } else {
            Expr::InputBag { input }
        };
        items.push(Projection::flattened(expr));
    }
    Ok(OpKind::ForEach { items })
}
