//! Step dependency graph.
//!
//! `StepGraph` mirrors a task's step list as a petgraph `DiGraph` so the
//! planner can reject plans whose dependencies reference unknown steps or
//! form a cycle. Edges point from a dependency to its dependent.

use crate::core::step::{Step, StepId};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

pub struct StepGraph {
    graph: DiGraph<StepId, ()>,
    self_loop: Option<StepId>,
}

impl StepGraph {
    /// Build the graph for a step list.
    ///
    /// # Errors
    /// Returns `Error::Validation` if two steps share an id or a step
    /// depends on an id that is not part of the list.
    pub fn from_steps(steps: &[Step]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for step in steps {
            if index.contains_key(&step.id) {
                return Err(Error::Validation(format!("duplicate step id {}", step.id)));
            }
            let node = graph.add_node(step.id.clone());
            index.insert(step.id.clone(), node);
        }

        let mut self_loop = None;
        for step in steps {
            let to = index[&step.id];
            for dep in &step.dependencies {
                let from = index.get(dep).ok_or_else(|| {
                    Error::Validation(format!(
                        "step {} depends on unknown step {}",
                        step.id, dep
                    ))
                })?;
                if dep == &step.id && self_loop.is_none() {
                    self_loop = Some(step.id.clone());
                }
                graph.add_edge(*from, to, ());
            }
        }

        Ok(Self { graph, self_loop })
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// A step that lies on a dependency cycle, if the graph has one.
    pub fn cycle_member(&self) -> Option<StepId> {
        if let Some(id) = &self.self_loop {
            return Some(id.clone());
        }
        toposort(&self.graph, None)
            .err()
            .and_then(|cycle| self.graph.node_weight(cycle.node_id()).cloned())
    }
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("steps", &self.step_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
