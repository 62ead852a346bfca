//! Expression trees carried by expression-bearing operators (filters,
//! projections, rearrange keys, sort keys).
//!
//! The compiler never evaluates these; it only needs their types, the UDFs
//! they reference, and whether they are plain column projections.

use serde::{Deserialize, Serialize};

use crate::file::FuncSpec;
use crate::schema::DataType;
use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Positional projection of one input column.
    Column { index: usize, data_type: DataType },
    /// The whole input row.
    Star,
    Const(Scalar),
    Udf {
        func: FuncSpec,
        args: Vec<Expr>,
        return_type: DataType,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// Bag holding the rows of input `input` inside a packaged group.
    InputBag { input: usize },
    /// Like `InputBag`, but an empty bag is replaced by one all-null tuple of
    /// `arity` fields so flattening keeps the other side's rows.
    PaddedBag { input: usize, arity: usize },
    /// Estimated serialized size of the current row.
    RowSize,
}

impl Expr {
    pub fn column(index: usize, data_type: DataType) -> Self {
        Expr::Column { index, data_type }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column { data_type, .. } => *data_type,
            Expr::Star => DataType::Tuple,
            Expr::Const(v) => v.data_type(),
            Expr::Udf { return_type, .. } => *return_type,
            Expr::Binary { op, left, .. } => {
                if op.is_predicate() {
                    DataType::Boolean
                } else {
                    left.data_type()
                }
            }
            Expr::Not(_) => DataType::Boolean,
            Expr::InputBag { .. } | Expr::PaddedBag { .. } => DataType::Bag,
            Expr::RowSize => DataType::Int64,
        }
    }

    /// Every UDF referenced anywhere in this tree, in pre-order.
    pub fn udfs(&self) -> Vec<FuncSpec> {
        let mut out = Vec::new();
        self.collect_udfs(&mut out);
        out
    }

    fn collect_udfs(&self, out: &mut Vec<FuncSpec>) {
        match self {
            Expr::Udf { func, args, .. } => {
                out.push(func.clone());
                for a in args {
                    a.collect_udfs(out);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_udfs(out);
                right.collect_udfs(out);
            }
            Expr::Not(inner) => inner.collect_udfs(out),
            _ => {}
        }
    }

    /// True for bare column references and `*`, the only key shapes an
    /// offline index can be built from.
    pub fn is_simple_projection(&self) -> bool {
        matches!(self, Expr::Column { .. } | Expr::Star)
    }
}

/// Key type of a rearrange over `keys`: the single key's type, or `Tuple`.
pub fn key_type(keys: &[Expr]) -> DataType {
    let types: Vec<DataType> = keys.iter().map(Expr::data_type).collect();
    DataType::key_type_of(&types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_single_vs_composite() {
        assert_eq!(key_type(&[Expr::column(0, DataType::Int64)]), DataType::Int64);
        assert_eq!(
            key_type(&[
                Expr::column(0, DataType::Int64),
                Expr::column(1, DataType::Utf8)
            ]),
            DataType::Tuple
        );
        assert_eq!(key_type(&[Expr::Star]), DataType::Tuple);
    }

    #[test]
    fn nested_udfs_are_collected() {
        let e = Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expr::Udf {
                func: FuncSpec::new("LEN"),
                args: vec![Expr::Udf {
                    func: FuncSpec::new("TRIM"),
                    args: vec![Expr::column(0, DataType::Utf8)],
                    return_type: DataType::Utf8,
                }],
                return_type: DataType::Int64,
            }),
            right: Box::new(Expr::Const(Scalar::I64(3))),
        };
        let names: Vec<_> = e.udfs().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["LEN", "TRIM"]);
        assert_eq!(e.data_type(), DataType::Boolean);
        assert!(!e.is_simple_projection());
    }
}
