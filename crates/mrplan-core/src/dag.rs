//! Operator DAGs: the input program and every job's map / combine / reduce
//! sub-plan share this one representation.
//!
//! Nodes are keyed by `OpId` in a `BTreeMap` so iteration is deterministic.
//! Edges keep insertion order; the predecessor order of a node is its input
//! order (join input `i` is the `i`-th predecessor).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};
use crate::file::FuncSpec;
use crate::id::OpId;
use crate::operator::Operator;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorPlan {
    nodes: BTreeMap<OpId, Operator>,
    edges: Vec<(OpId, OpId)>,
}

impl OperatorPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: OpId) -> Option<&Operator> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut Operator> {
        self.nodes.get_mut(&id)
    }

    /// Look up a node that must exist.
    pub fn node(&self, id: OpId) -> Result<&Operator> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::structural(Some(id), "operator not in plan"))
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = OpId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn edges(&self) -> &[(OpId, OpId)] {
        &self.edges
    }

    pub fn max_id(&self) -> Option<OpId> {
        self.nodes.keys().next_back().copied()
    }

    pub fn add(&mut self, op: Operator) -> Result<OpId> {
        let id = op.id;
        if self.nodes.contains_key(&id) {
            return Err(Error::structural(Some(id), "duplicate operator id"));
        }
        self.nodes.insert(id, op);
        Ok(id)
    }

    pub fn connect(&mut self, from: OpId, to: OpId) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(Error::structural(Some(id), "cannot connect a missing operator"));
            }
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(())
    }

    /// Remove the edge `from -> to`; returns whether it existed.
    pub fn disconnect(&mut self, from: OpId, to: OpId) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| *e != (from, to));
        before != self.edges.len()
    }

    /// Remove a node and every edge touching it.
    pub fn remove(&mut self, id: OpId) -> Option<Operator> {
        let op = self.nodes.remove(&id)?;
        self.edges.retain(|(f, t)| *f != id && *t != id);
        Some(op)
    }

    /// Remove a node, wiring each of its predecessors to each of its successors.
    pub fn remove_and_reconnect(&mut self, id: OpId) -> Option<Operator> {
        let preds = self.predecessors(id);
        let succs = self.successors(id);
        let op = self.remove(id)?;
        for p in &preds {
            for s in &succs {
                if !self.edges.contains(&(*p, *s)) {
                    self.edges.push((*p, *s));
                }
            }
        }
        Some(op)
    }

    /// Add `op` below every current leaf. On an empty plan it becomes the root.
    pub fn add_as_leaf(&mut self, op: Operator) -> Result<OpId> {
        let leaves = self.leaves();
        let id = self.add(op)?;
        for leaf in leaves {
            self.edges.push((leaf, id));
        }
        Ok(id)
    }

    /// Insert `op` on the edge between `from` and `to`.
    pub fn insert_between(&mut self, from: OpId, op: Operator, to: OpId) -> Result<OpId> {
        if !self.disconnect(from, to) {
            return Err(Error::structural(Some(from), "no edge to insert into"));
        }
        let id = self.add(op)?;
        self.edges.push((from, id));
        self.edges.push((id, to));
        Ok(id)
    }

    /// Disjoint union with `other`. Identities are unique per compilation, so a
    /// clash means two plans claimed the same operator.
    pub fn splice(&mut self, other: OperatorPlan) -> Result<()> {
        if let Some(clash) = other.nodes.keys().find(|id| self.nodes.contains_key(id)) {
            return Err(Error::structural(
                Some(*clash),
                "operator appears in two plans being merged",
            ));
        }
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
        Ok(())
    }

    pub fn predecessors(&self, id: OpId) -> Vec<OpId> {
        self.edges
            .iter()
            .filter(|(_, t)| *t == id)
            .map(|(f, _)| *f)
            .collect()
    }

    pub fn successors(&self, id: OpId) -> Vec<OpId> {
        self.edges
            .iter()
            .filter(|(f, _)| *f == id)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn roots(&self) -> Vec<OpId> {
        let targets: BTreeSet<OpId> = self.edges.iter().map(|(_, t)| *t).collect();
        self.nodes
            .keys()
            .filter(|id| !targets.contains(id))
            .copied()
            .collect()
    }

    pub fn leaves(&self) -> Vec<OpId> {
        let sources: BTreeSet<OpId> = self.edges.iter().map(|(f, _)| *f).collect();
        self.nodes
            .keys()
            .filter(|id| !sources.contains(id))
            .copied()
            .collect()
    }

    /// Kahn order; fails if the plan has a cycle.
    pub fn topological_order(&self) -> Result<Vec<OpId>> {
        let mut in_degree: BTreeMap<OpId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        for (_, t) in &self.edges {
            *in_degree.entry(*t).or_default() += 1;
        }
        let mut ready: VecDeque<OpId> = in_degree
            .iter()
            .filter_map(|(id, d)| (*d == 0).then_some(*id))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for s in self.successors(id) {
                if let Some(d) = in_degree.get_mut(&s) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(s);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(Error::structural(None, "operator plan contains a cycle"));
        }
        Ok(order)
    }

    /// Union of every operator's function references.
    pub fn udfs(&self) -> BTreeSet<FuncSpec> {
        self.nodes.values().flat_map(Operator::udfs).collect()
    }

    /// The only leaf, if the plan has exactly one.
    pub fn sole_leaf(&self) -> Option<&Operator> {
        match self.leaves().as_slice() {
            [only] => self.nodes.get(only),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileSpec, FuncSpec};
    use crate::operator::{OpKind, Operator};

    fn load(id: u64) -> Operator {
        Operator::load(
            OpId::new(id),
            FileSpec::new(format!("in/{id}"), FuncSpec::new("PigStorage")),
        )
    }

    fn union(id: u64) -> Operator {
        Operator::new(OpId::new(id), OpKind::Union)
    }

    #[test]
    fn add_as_leaf_joins_all_leaves() {
        let mut p = OperatorPlan::new();
        p.add(load(1)).unwrap();
        p.add(load(2)).unwrap();
        p.add_as_leaf(union(3)).unwrap();
        assert_eq!(p.predecessors(OpId::new(3)), vec![OpId::new(1), OpId::new(2)]);
        assert_eq!(p.leaves(), vec![OpId::new(3)]);
        assert_eq!(p.roots(), vec![OpId::new(1), OpId::new(2)]);
    }

    #[test]
    fn remove_and_reconnect_bridges_neighbours() {
        let mut p = OperatorPlan::new();
        p.add(load(1)).unwrap();
        p.add_as_leaf(union(2)).unwrap();
        p.add_as_leaf(union(3)).unwrap();
        p.remove_and_reconnect(OpId::new(2));
        assert_eq!(p.successors(OpId::new(1)), vec![OpId::new(3)]);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn splice_rejects_shared_ids() {
        let mut a = OperatorPlan::new();
        a.add(load(1)).unwrap();
        let mut b = OperatorPlan::new();
        b.add(load(1)).unwrap();
        assert!(a.splice(b).is_err());
    }

    #[test]
    fn topological_order_detects_cycles() {
        let mut p = OperatorPlan::new();
        p.add(union(1)).unwrap();
        p.add(union(2)).unwrap();
        p.connect(OpId::new(1), OpId::new(2)).unwrap();
        assert_eq!(p.topological_order().unwrap(), vec![OpId::new(1), OpId::new(2)]);
        p.connect(OpId::new(2), OpId::new(1)).unwrap();
        assert!(p.topological_order().is_err());
    }
}
