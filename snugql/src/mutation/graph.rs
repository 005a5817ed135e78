use log::trace;

use super::SubmissionPlan;
use crate::{registry::Schema, types::RelationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Aggregation dependencies among the entities of one submission.
///
/// Nodes are indices into the submission; `edges[a]` lists the nodes `a`
/// references through an Aggregation field, in field declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn from_edges(edges: Vec<Vec<usize>>) -> Self {
        Self { edges }
    }

    pub(crate) fn build(schema: &Schema, plan: &SubmissionPlan<'_>) -> Self {
        let mut edges = vec![Vec::new(); plan.records.len()];
        for (node, record) in plan.records.iter().enumerate() {
            for (field, reference) in record.descriptor.references() {
                if reference.relation != RelationKind::Aggregation || schema.entity(&reference.target).is_none() {
                    continue;
                }
                let Some(value) = record.input.get(&field.name).filter(|value| !value.is_null()) else {
                    continue;
                };
                if let Some(target) = plan.lookup(&reference.target, value) {
                    trace!("node {node} depends on node {target} through `{}`", field.name);
                    edges[node].push(target);
                }
            }
        }
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Depth-first topological order, dependencies first.
    ///
    /// Roots are visited in node order, so independent nodes keep their
    /// submission order. Returns the node at which a cycle was closed if the
    /// graph is not acyclic; a node referencing itself is a cycle.
    pub fn order(&self) -> Result<Vec<usize>, usize> {
        let mut marks = vec![Mark::Unvisited; self.edges.len()];
        let mut order = Vec::with_capacity(self.edges.len());
        for node in 0..self.edges.len() {
            self.visit(node, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(&self, node: usize, marks: &mut [Mark], order: &mut Vec<usize>) -> Result<(), usize> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(node),
            Mark::Unvisited => {}
        }
        marks[node] = Mark::InProgress;
        for &dependency in &self.edges[node] {
            self.visit(dependency, marks, order)?;
        }
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }
}
