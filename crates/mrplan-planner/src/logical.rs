//! Input plan surface: the core operator DAG, a builder for it, and the
//! shape checks every input must pass before compilation starts.

use mrplan_core::dag::OperatorPlan;
use mrplan_core::error::{Error, Result};
use mrplan_core::file::{FileSpec, FuncSpec};
use mrplan_core::id::OpId;
use mrplan_core::operator::{OpKind, Operator};

pub use mrplan_core::dag::OperatorPlan as LogicalPlan;

/// Builds input plans with sequential ids; each input edge is added in the
/// order given, which is the input order joins see.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    plan: OperatorPlan,
    next: u64,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already-identified operator fed by `inputs`.
    pub fn add(&mut self, op: Operator, inputs: &[OpId]) -> Result<OpId> {
        self.next = self.next.max(op.id.get() + 1);
        let id = self.plan.add(op)?;
        for input in inputs {
            self.plan.connect(*input, id)?;
        }
        Ok(id)
    }

    pub fn op(&mut self, kind: OpKind, inputs: &[OpId]) -> Result<OpId> {
        let id = OpId::new(self.next);
        self.add(Operator::new(id, kind), inputs)
    }

    pub fn load(&mut self, path: &str, loader: &str) -> Result<OpId> {
        let id = OpId::new(self.next);
        self.add(Operator::load(id, file(path, loader)), &[])
    }

    pub fn store(&mut self, input: OpId, path: &str, storer: &str) -> Result<OpId> {
        let id = OpId::new(self.next);
        self.add(Operator::store(id, file(path, storer)), &[input])
    }

    pub fn set_parallelism(&mut self, id: OpId, parallelism: usize) -> Result<()> {
        let op = self
            .plan
            .get_mut(id)
            .ok_or_else(|| Error::structural(Some(id), "no such operator"))?;
        op.parallelism = Some(parallelism);
        Ok(())
    }

    pub fn build(self) -> OperatorPlan {
        self.plan
    }
}

fn file(path: &str, func: &str) -> FileSpec {
    FileSpec::new(path, FuncSpec::new(func))
}

/// Shape checks run before any job is opened: the plan is acyclic, every
/// leaf is a store, only splits and stores fan out, and loads are either
/// roots or chained from a single store.
pub fn check_input(plan: &OperatorPlan) -> Result<()> {
    plan.topological_order()?;
    if plan.is_empty() {
        return Err(Error::structural(None, "plan has no operators"));
    }
    for id in plan.leaves() {
        let op = plan.node(id)?;
        if !op.is_store() {
            return Err(Error::structural(
                Some(id),
                format!("leaf {} is not a Store", op.name()),
            ));
        }
    }
    for op in plan.operators() {
        let fan_out = plan.successors(op.id).len();
        if fan_out > 1 && !matches!(op.kind, OpKind::Split { .. } | OpKind::Store { .. }) {
            return Err(Error::structural(
                Some(op.id),
                format!("{} feeds {fan_out} operators; only Split may fan out", op.name()),
            ));
        }
        let preds = plan.predecessors(op.id);
        if op.is_load() && !preds.is_empty() {
            let chained = match preds.as_slice() {
                [only] => plan.node(*only)?.is_store(),
                _ => false,
            };
            if !chained {
                return Err(Error::structural(
                    Some(op.id),
                    "a Load may only follow a single Store",
                ));
            }
        }
        if !op.is_load() && preds.is_empty() {
            return Err(Error::structural(
                Some(op.id),
                format!("{} has no input", op.name()),
            ));
        }
    }
    Ok(())
}
