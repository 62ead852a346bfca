//! YAML → input plan parser.
//!
//! Example:
//! ```yaml
//! config: { seed: 7, default_parallelism: 4 }
//! operators:
//!   - { id: 1, op: load, path: "in/users", func: PigStorage,
//!       schema: [ {name: uid, type: Int64}, {name: name, type: Utf8} ] }
//!   - { id: 2, op: load, path: "in/clicks", func: PigStorage }
//!   - { id: 3, op: join, strategy: hash, inputs: [1, 2],
//!       keys: [["$0:int64"], ["$1:int64"]] }
//!   - { id: 4, op: store, inputs: [3], path: "out/joined" }
//! ```
//!
//! Operators may appear in any order; `inputs` order is the input order the
//! compiler sees. Join schemas are taken from `load` inputs that declare one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mrplan_core::error::{Error, Result};
use mrplan_core::expr::Expr;
use mrplan_core::file::{FileSpec, FuncSpec};
use mrplan_core::id::OpId;
use mrplan_core::operator::{OpKind, Operator, Projection, RearrangeMode, SortKey};
use mrplan_core::schema::{Field, Schema};

use crate::dsl::expr::{parse_expr, parse_type};
use crate::logical::LogicalPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDoc {
    #[serde(default)]
    pub config: Option<PlanConfig>,
    pub operators: Vec<OperatorDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDef {
    pub id: u64,
    #[serde(default)]
    pub inputs: Vec<u64>,
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(flatten)]
    pub step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Step {
    Load {
        path: String,
        #[serde(default = "default_func")]
        func: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        schema: Option<Vec<FieldDef>>,
    },
    Store {
        path: String,
        #[serde(default = "default_func")]
        func: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Filter {
        predicate: String,
    },
    Foreach {
        items: Vec<ItemDef>,
    },
    Rearrange {
        #[serde(default)]
        index: usize,
        keys: Vec<String>,
        #[serde(default)]
        mode: ModeDef,
        #[serde(default)]
        partition_file: Option<String>,
    },
    GlobalRearrange,
    Package {
        num_inputs: usize,
        #[serde(default)]
        inner: Vec<bool>,
        #[serde(default)]
        distinct: bool,
    },
    Union,
    Split {
        #[serde(default)]
        path: Option<String>,
        #[serde(default = "default_func")]
        func: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Stream {
        command: String,
        #[serde(default)]
        ship: Vec<String>,
    },
    Distinct,
    Sort {
        keys: Vec<SortKeyDef>,
        #[serde(default)]
        comparator: Option<String>,
        #[serde(default)]
        limit: Option<u64>,
    },
    Limit {
        count: u64,
    },
    Join {
        #[serde(default)]
        strategy: JoinStrategy,
        keys: Vec<Vec<String>>,
        #[serde(default)]
        outer: Vec<bool>,
        #[serde(default)]
        left_outer: bool,
    },
    CollectedGroup {
        keys: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    #[default]
    Hash,
    Replicated,
    Skewed,
    Merge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeDef {
    #[default]
    Keyed,
    Distinct,
    Scatter,
}

/// `"$0"` or `{ expr: "#1", flatten: true }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemDef {
    Expr(String),
    Full {
        expr: String,
        #[serde(default)]
        flatten: bool,
    },
}

/// `"$0"` or `{ expr: "$0", ascending: false }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKeyDef {
    Expr(String),
    Full {
        expr: String,
        #[serde(default = "default_true")]
        ascending: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

fn default_func() -> String {
    "PigStorage".into()
}

fn default_true() -> bool {
    true
}

/// Compiler settings a plan may carry; each set field overrides the
/// environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub temp_dir: Option<String>,
    pub temp_serializer: Option<String>,
    pub seed: Option<u64>,
    pub default_parallelism: Option<usize>,
    pub skew_reducers: Option<usize>,
    pub skew_sample_rate: Option<u64>,
    pub skew_memory_fraction: Option<f64>,
    pub sort_sample_size: Option<u64>,
    pub adjust_rearranges: Option<bool>,
    pub adjust_limits: Option<bool>,
    pub indexed_loaders: Option<Vec<String>>,
    pub collected_group_loaders: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ParsedPlan {
    pub plan: LogicalPlan,
    pub config: PlanConfig,
}

/// Parse a YAML document into an input plan plus its config section.
/// Shape checks are left to the compiler.
pub fn parse_yaml_plan(yaml_src: &str) -> Result<ParsedPlan> {
    let doc: PlanDoc =
        serde_yaml::from_str(yaml_src).map_err(|e| Error::Parse(e.to_string()))?;
    if doc.operators.is_empty() {
        return Err(Error::Parse("plan has no operators".into()));
    }

    let mut schemas: BTreeMap<u64, Schema> = BTreeMap::new();
    for def in &doc.operators {
        if let Step::Load {
            schema: Some(fields),
            ..
        } = &def.step
        {
            schemas.insert(def.id, to_schema(fields)?);
        }
    }

    let mut plan = LogicalPlan::new();
    for def in &doc.operators {
        let kind = lower_step(def, &schemas)?;
        let mut op = Operator::new(OpId::new(def.id), kind);
        op.parallelism = def.parallelism;
        op.alias = def.alias.clone();
        plan.add(op)
            .map_err(|_| Error::Parse(format!("duplicate operator id {}", def.id)))?;
    }
    for def in &doc.operators {
        for input in &def.inputs {
            plan.connect(OpId::new(*input), OpId::new(def.id))
                .map_err(|_| {
                    Error::Parse(format!(
                        "operator {} reads unknown operator {input}",
                        def.id
                    ))
                })?;
        }
    }

    Ok(ParsedPlan {
        plan,
        config: doc.config.unwrap_or_default(),
    })
}

fn lower_step(def: &OperatorDef, schemas: &BTreeMap<u64, Schema>) -> Result<OpKind> {
    Ok(match &def.step {
        Step::Load {
            path,
            func,
            args,
            schema,
        } => OpKind::Load {
            file: FileSpec::new(path, FuncSpec::with_args(func, args)),
            schema: schema.as_deref().map(to_schema).transpose()?,
            temp: false,
        },
        Step::Store { path, func, args } => OpKind::Store {
            file: FileSpec::new(path, FuncSpec::with_args(func, args)),
            temp: false,
        },
        Step::Filter { predicate } => OpKind::Filter {
            predicate: parse_expr(predicate)?,
        },
        Step::Foreach { items } => OpKind::ForEach {
            items: items
                .iter()
                .map(|item| -> Result<Projection> {
                    Ok(match item {
                        ItemDef::Expr(e) => Projection::plain(parse_expr(e)?),
                        ItemDef::Full { expr, flatten } => Projection {
                            expr: parse_expr(expr)?,
                            flatten: *flatten,
                        },
                    })
                })
                .collect::<Result<_>>()?,
        },
        Step::Rearrange {
            index,
            keys,
            mode,
            partition_file,
        } => {
            let keys = parse_all(keys)?;
            let mode = match (mode, partition_file) {
                (ModeDef::Keyed, _) => RearrangeMode::Keyed,
                (ModeDef::Distinct, _) => RearrangeMode::Distinct,
                (ModeDef::Scatter, Some(path)) => RearrangeMode::Scatter {
                    partition_file: FileSpec::new(path, FuncSpec::new(default_func())),
                },
                (ModeDef::Scatter, None) => {
                    return Err(Error::Parse(format!(
                        "operator {}: scatter rearrange needs a partition_file",
                        def.id
                    )))
                }
            };
            OpKind::LocalRearrange {
                index: *index,
                key_type: mrplan_core::expr::key_type(&keys),
                keys,
                mode,
            }
        }
        Step::GlobalRearrange => OpKind::GlobalRearrange,
        Step::Package {
            num_inputs,
            inner,
            distinct,
        } => OpKind::Package {
            num_inputs: *num_inputs,
            inner: if inner.is_empty() {
                vec![false; *num_inputs]
            } else {
                inner.clone()
            },
            distinct: *distinct,
        },
        Step::Union => OpKind::Union,
        Step::Split { path, func, args } => OpKind::Split {
            file: path
                .as_ref()
                .map(|path| FileSpec::new(path, FuncSpec::with_args(func, args))),
        },
        Step::Stream { command, ship } => OpKind::Stream {
            command: command.clone(),
            ship: ship.clone(),
        },
        Step::Distinct => OpKind::Distinct,
        Step::Sort {
            keys,
            comparator,
            limit,
        } => OpKind::Sort {
            keys: keys
                .iter()
                .map(|k| -> Result<SortKey> {
                    Ok(match k {
                        SortKeyDef::Expr(e) => SortKey {
                            expr: parse_expr(e)?,
                            ascending: true,
                        },
                        SortKeyDef::Full { expr, ascending } => SortKey {
                            expr: parse_expr(expr)?,
                            ascending: *ascending,
                        },
                    })
                })
                .collect::<Result<_>>()?,
            comparator: comparator.as_deref().map(FuncSpec::new),
            limit: *limit,
        },
        Step::Limit { count } => OpKind::Limit { count: *count },
        Step::Join {
            strategy,
            keys,
            outer,
            left_outer,
        } => {
            let keys = keys
                .iter()
                .map(|k| parse_all(k))
                .collect::<Result<Vec<_>>>()?;
            let input_schemas: Vec<Option<Schema>> = def
                .inputs
                .iter()
                .map(|i| schemas.get(i).cloned())
                .collect();
            let outer = if outer.is_empty() {
                vec![false; def.inputs.len()]
            } else {
                outer.clone()
            };
            match strategy {
                JoinStrategy::Hash => OpKind::HashJoin {
                    keys,
                    outer,
                    schemas: input_schemas,
                },
                JoinStrategy::Replicated => OpKind::ReplicatedJoin {
                    keys,
                    left_outer: *left_outer,
                    schemas: input_schemas,
                    replicas: vec![],
                    null_tuple_arity: None,
                },
                JoinStrategy::Skewed => OpKind::SkewedJoin {
                    keys,
                    outer,
                    schemas: input_schemas,
                },
                JoinStrategy::Merge => OpKind::MergeJoin { keys, right: None },
            }
        }
        Step::CollectedGroup { keys } => OpKind::CollectedGroup {
            keys: parse_all(keys)?,
        },
    })
}

fn parse_all(exprs: &[String]) -> Result<Vec<Expr>> {
    exprs
        .iter()
        .map(|e| parse_expr(e).map_err(Error::from))
        .collect()
}

fn to_schema(fields: &[FieldDef]) -> Result<Schema> {
    fields
        .iter()
        .map(|f| -> Result<Field> {
            Ok(Field::new(
                f.name.clone(),
                parse_type(&f.data_type)?,
                f.nullable,
            ))
        })
        .collect::<Result<Vec<_>>>()
        .map(Schema::new)
}
