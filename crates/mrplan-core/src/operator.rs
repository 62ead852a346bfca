//! The closed operator set shared by input programs and job sub-plans.
//!
//! The same kind can mean slightly different things depending on where it
//! sits: a `Sort` in an input program is a global order-by the compiler has
//! to lower, while a `Sort` inside a job's reduce plan sorts one reducer's
//! group locally.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::expr::Expr;
use crate::file::{FileSpec, FuncSpec};
use crate::id::OpId;
use crate::schema::{DataType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OpId,
    pub kind: OpKind,
    /// Requested parallelism; `None` means "use the default".
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default = "tuple_type")]
    pub result_type: DataType,
    #[serde(default)]
    pub alias: Option<String>,
}

fn tuple_type() -> DataType {
    DataType::Tuple
}

fn default_true() -> bool {
    true
}

/// Flavor of a local rearrange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RearrangeMode {
    /// Plain `(key, input index, row)` tagging; one key goes to one reducer.
    Keyed,
    /// Keyed on the whole row; the matching package collapses duplicates.
    Distinct,
    /// Skewed-join scatter: consults the partition file at runtime and fans a
    /// hot key across several reducers.
    Scatter { partition_file: FileSpec },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    #[serde(default)]
    pub flatten: bool,
}

impl Projection {
    pub fn plain(expr: Expr) -> Self {
        Self {
            expr,
            flatten: false,
        }
    }

    pub fn flattened(expr: Expr) -> Self {
        Self {
            expr,
            flatten: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

/// Right side of a sort-merge join, resolved by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeJoinRight {
    /// Right input file and the loader that reads it.
    pub file: FileSpec,
    /// Offline index file; `None` when the loader indexes natively.
    pub index: Option<FileSpec>,
    /// Operators applied to right rows after loading, in order.
    #[serde(default)]
    pub pipeline: Vec<Operator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Load {
        file: FileSpec,
        #[serde(default)]
        schema: Option<Schema>,
        #[serde(default)]
        temp: bool,
    },
    Store {
        file: FileSpec,
        #[serde(default)]
        temp: bool,
    },
    Filter {
        predicate: Expr,
    },
    ForEach {
        items: Vec<Projection>,
    },
    LocalRearrange {
        index: usize,
        keys: Vec<Expr>,
        key_type: DataType,
        mode: RearrangeMode,
    },
    GlobalRearrange,
    Package {
        num_inputs: usize,
        /// `inner[i]` drops groups where input `i` contributed no rows.
        inner: Vec<bool>,
        #[serde(default)]
        distinct: bool,
    },
    Union,
    Split {
        #[serde(default)]
        file: Option<FileSpec>,
    },
    Stream {
        command: String,
        #[serde(default)]
        ship: Vec<String>,
    },
    Distinct,
    Sort {
        keys: Vec<SortKey>,
        #[serde(default)]
        comparator: Option<FuncSpec>,
        #[serde(default)]
        limit: Option<u64>,
    },
    Limit {
        count: u64,
    },
    HashJoin {
        keys: Vec<Vec<Expr>>,
        /// `outer[i]` pads input `i` with nulls when it has no match.
        outer: Vec<bool>,
        #[serde(default)]
        schemas: Vec<Option<Schema>>,
    },
    ReplicatedJoin {
        keys: Vec<Vec<Expr>>,
        #[serde(default)]
        left_outer: bool,
        #[serde(default)]
        schemas: Vec<Option<Schema>>,
        /// Broadcast files, one per input; the fragment slot stays `None`.
        #[serde(default)]
        replicas: Vec<Option<FileSpec>>,
        #[serde(default)]
        null_tuple_arity: Option<usize>,
    },
    SkewedJoin {
        keys: Vec<Vec<Expr>>,
        outer: Vec<bool>,
        #[serde(default)]
        schemas: Vec<Option<Schema>>,
    },
    MergeJoin {
        keys: Vec<Vec<Expr>>,
        #[serde(default)]
        right: Option<MergeJoinRight>,
    },
    CollectedGroup {
        keys: Vec<Expr>,
    },
}

impl Operator {
    pub fn new(id: OpId, kind: OpKind) -> Self {
        Self {
            id,
            kind,
            parallelism: None,
            result_type: DataType::Tuple,
            alias: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn load(id: OpId, file: FileSpec) -> Self {
        Self::new(
            id,
            OpKind::Load {
                file,
                schema: None,
                temp: false,
            },
        )
    }

    pub fn store(id: OpId, file: FileSpec) -> Self {
        Self::new(id, OpKind::Store { file, temp: false })
    }

    pub fn temp_load(id: OpId, file: FileSpec) -> Self {
        Self::new(
            id,
            OpKind::Load {
                file,
                schema: None,
                temp: true,
            },
        )
    }

    pub fn temp_store(id: OpId, file: FileSpec) -> Self {
        Self::new(id, OpKind::Store { file, temp: true })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_store(&self) -> bool {
        matches!(self.kind, OpKind::Store { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self.kind, OpKind::Load { .. })
    }

    /// File this operator reads, if it is a load.
    pub fn load_file(&self) -> Option<&FileSpec> {
        match &self.kind {
            OpKind::Load { file, .. } => Some(file),
            _ => None,
        }
    }

    /// File this operator writes, if it is a store.
    pub fn store_file(&self) -> Option<&FileSpec> {
        match &self.kind {
            OpKind::Store { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Side files read besides the main input (broadcast replicas, merge-join
    /// right input and index, skew partition file).
    pub fn side_files(&self) -> Vec<&FileSpec> {
        match &self.kind {
            OpKind::ReplicatedJoin { replicas, .. } => replicas.iter().flatten().collect(),
            OpKind::MergeJoin {
                right: Some(right), ..
            } => std::iter::once(&right.file).chain(right.index.iter()).collect(),
            OpKind::LocalRearrange {
                mode: RearrangeMode::Scatter { partition_file },
                ..
            } => vec![partition_file],
            _ => vec![],
        }
    }

    /// Function references the executor has to ship for this operator.
    pub fn udfs(&self) -> Vec<FuncSpec> {
        let mut out = Vec::new();
        let keyed = |out: &mut Vec<FuncSpec>, keys: &[Vec<Expr>]| {
            for k in keys.iter().flatten() {
                out.extend(k.udfs());
            }
        };
        match &self.kind {
            OpKind::Load { file, .. } | OpKind::Store { file, .. } => out.push(file.func.clone()),
            OpKind::Filter { predicate } => out.extend(predicate.udfs()),
            OpKind::ForEach { items } => {
                for item in items {
                    out.extend(item.expr.udfs());
                }
            }
            OpKind::LocalRearrange { keys, .. } | OpKind::CollectedGroup { keys } => {
                for k in keys {
                    out.extend(k.udfs());
                }
            }
            OpKind::Sort {
                keys, comparator, ..
            } => {
                for k in keys {
                    out.extend(k.expr.udfs());
                }
                out.extend(comparator.iter().cloned());
            }
            OpKind::HashJoin { keys, .. }
            | OpKind::ReplicatedJoin { keys, .. }
            | OpKind::SkewedJoin { keys, .. } => keyed(&mut out, keys),
            OpKind::MergeJoin { keys, right } => {
                keyed(&mut out, keys);
                if let Some(right) = right {
                    out.push(right.file.func.clone());
                    for op in &right.pipeline {
                        out.extend(op.udfs());
                    }
                }
            }
            OpKind::Stream { command, .. } => {
                out.push(FuncSpec::with_args("Stream", [command.as_str()]))
            }
            OpKind::GlobalRearrange
            | OpKind::Package { .. }
            | OpKind::Union
            | OpKind::Split { .. }
            | OpKind::Distinct
            | OpKind::Limit { .. } => {}
        }
        out
    }

    /// True for operators that need a key repartition of their input.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.kind,
            OpKind::GlobalRearrange
                | OpKind::Distinct
                | OpKind::Sort { .. }
                | OpKind::HashJoin { .. }
                | OpKind::SkewedJoin { .. }
        )
    }
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Load { .. } => "Load",
            OpKind::Store { .. } => "Store",
            OpKind::Filter { .. } => "Filter",
            OpKind::ForEach { .. } => "ForEach",
            OpKind::LocalRearrange { .. } => "LocalRearrange",
            OpKind::GlobalRearrange => "GlobalRearrange",
            OpKind::Package { .. } => "Package",
            OpKind::Union => "Union",
            OpKind::Split { .. } => "Split",
            OpKind::Stream { .. } => "Stream",
            OpKind::Distinct => "Distinct",
            OpKind::Sort { .. } => "Sort",
            OpKind::Limit { .. } => "Limit",
            OpKind::HashJoin { .. } => "HashJoin",
            OpKind::ReplicatedJoin { .. } => "ReplicatedJoin",
            OpKind::SkewedJoin { .. } => "SkewedJoin",
            OpKind::MergeJoin { .. } => "MergeJoin",
            OpKind::CollectedGroup { .. } => "CollectedGroup",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.id.get())?;
        match &self.kind {
            OpKind::Load { file, .. } | OpKind::Store { file, .. } => write!(f, "({file})")?,
            OpKind::LocalRearrange {
                index, keys, mode, ..
            } => {
                write!(f, "(index={index}, keys={}", keys.len())?;
                match mode {
                    RearrangeMode::Keyed => write!(f, ")")?,
                    RearrangeMode::Distinct => write!(f, ", distinct)")?,
                    RearrangeMode::Scatter { partition_file } => {
                        write!(f, ", scatter={})", partition_file.path)?
                    }
                }
            }
            OpKind::Package {
                num_inputs,
                distinct,
                ..
            } => {
                write!(f, "(inputs={num_inputs}")?;
                if *distinct {
                    write!(f, ", distinct")?;
                }
                write!(f, ")")?;
            }
            OpKind::Limit { count } => write!(f, "({count})")?,
            OpKind::Stream { command, .. } => write!(f, "(`{command}`)")?,
            _ => {}
        }
        if let Some(alias) = &self.alias {
            write!(f, " as {alias}")?;
        }
        Ok(())
    }
}
