//! Execution order of the recalls attached to one audio
//!
//! Recalls run in attachment order, except that a recall declaring a
//! dependency runs after everything it depends on. An edge that would close a
//! cycle is rejected and the edge set is left as it was.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction as EdgeDirection;

use crate::error::StructuralError;
use crate::primitives::RecallId;

#[derive(Debug, Clone, Default)]
pub struct DependencyOrder {
    attached: Vec<RecallId>,
    /// Edge `a -> b` means `b` runs after `a`
    edges: DiGraphMap<RecallId, ()>,
}

impl DependencyOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, recall: RecallId) {
        if !self.edges.contains_node(recall) {
            self.attached.push(recall);
            self.edges.add_node(recall);
        }
    }

    /// Remove a recall and every edge touching it
    pub fn detach(&mut self, recall: RecallId) -> bool {
        let Some(pos) = self.attached.iter().position(|r| *r == recall) else {
            return false;
        };
        self.attached.remove(pos);
        self.edges.remove_node(recall);
        true
    }

    pub fn contains(&self, recall: RecallId) -> bool {
        self.edges.contains_node(recall)
    }

    /// Validate a dependency edge without adding it
    pub fn check_dependency(
        &self,
        recall: RecallId,
        depends_on: RecallId,
    ) -> Result<(), StructuralError> {
        for id in [recall, depends_on] {
            if !self.contains(id) {
                return Err(StructuralError::RecallNotFound(id));
            }
        }

        if recall == depends_on || has_path_connecting(&self.edges, recall, depends_on, None) {
            return Err(StructuralError::DependencyCycle { recall, depends_on });
        }
        Ok(())
    }

    /// Declare that `recall` runs after `depends_on`
    pub fn add_dependency(
        &mut self,
        recall: RecallId,
        depends_on: RecallId,
    ) -> Result<(), StructuralError> {
        self.check_dependency(recall, depends_on)?;
        self.edges.add_edge(depends_on, recall, ());
        Ok(())
    }

    /// Direct predecessors of `recall`
    pub fn dependencies(&self, recall: RecallId) -> Vec<RecallId> {
        if !self.contains(recall) {
            return Vec::new();
        }
        let mut deps: Vec<RecallId> = self
            .edges
            .neighbors_directed(recall, EdgeDirection::Incoming)
            .collect();
        deps.sort_by_key(|id| self.position(*id));
        deps
    }

    /// Topological order with ties broken by attachment order
    pub fn order(&self) -> Vec<RecallId> {
        let seq: HashMap<RecallId, usize> = self
            .attached
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut indegree: HashMap<RecallId, usize> = self
            .attached
            .iter()
            .map(|id| {
                let n = self
                    .edges
                    .neighbors_directed(*id, EdgeDirection::Incoming)
                    .count();
                (*id, n)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, RecallId)>> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| Reverse((seq[id], *id)))
            .collect();

        let mut order = Vec::with_capacity(self.attached.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for next in self.edges.neighbors_directed(id, EdgeDirection::Outgoing) {
                if let Some(n) = indegree.get_mut(&next) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(Reverse((seq[&next], next)));
                    }
                }
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    fn position(&self, recall: RecallId) -> usize {
        self.attached
            .iter()
            .position(|r| *r == recall)
            .unwrap_or(usize::MAX)
    }
}
