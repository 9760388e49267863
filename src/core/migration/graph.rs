//! Pipeline invocation graph: cycle detection, deployment waves, DOT output.

use crate::core::migration::activities::collect_invocations;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::ParsedTemplate;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// `from` invokes `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

struct PipelineNode {
    name: String,
}

impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Edge weight: the caller runs the callee through an invocation activity.
struct Invocation;

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invokes")
    }
}

pub struct DependencyGraph {
    graph: DiGraph<PipelineNode, Invocation>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from every pipeline's invocation activities.
    pub fn build(
        template: &ParsedTemplate,
        max_depth: usize,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut invocations = Vec::new();
        for name in template.pipeline_names() {
            if let Some(definition) = template.pipeline(&name) {
                let targets = collect_invocations(&definition.activities, max_depth);
                invocations.push((name.clone(), targets));
            } else {
                invocations.push((name.clone(), Vec::new()));
            }
        }

        let mut graph = Self::from_pipelines(invocations.iter().map(|(name, _)| name.clone()));
        for (from, targets) in &invocations {
            for to in targets {
                if !graph.add_edge(from, to) {
                    diagnostics.at(
                        from.clone(),
                        MigrationIssue::MissingPipelineReference { pipeline: to.clone() },
                    );
                }
            }
        }
        graph
    }

    pub fn from_pipelines(names: impl IntoIterator<Item = String>) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for name in names {
            if nodes.contains_key(&name) {
                continue;
            }
            let idx = graph.add_node(PipelineNode { name: name.clone() });
            nodes.insert(name, idx);
        }
        Self { graph, nodes }
    }

    /// Adds `from → to`; returns false when either end is unknown.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => {
                self.graph.update_edge(a, b, Invocation);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| DependencyEdge {
                from: self.graph[a].name.clone(),
                to: self.graph[b].name.clone(),
            })
            .collect();
        edges.sort();
        edges
    }

    fn sorted_successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        next.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        next.dedup();
        next
    }

    /// First cycle found by a depth-first walk, as a closed path `[A, B, A]`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashMap<NodeIndex, bool> = HashMap::new();
        let mut stack: Vec<NodeIndex> = Vec::new();
        for &start in self.nodes.values() {
            if visited.contains_key(&start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        node: NodeIndex,
        visited: &mut HashMap<NodeIndex, bool>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        visited.insert(node, true);
        stack.push(node);
        for next in self.sorted_successors(node) {
            match visited.get(&next) {
                Some(true) => {
                    let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|n| self.graph[*n].name.clone())
                        .collect();
                    cycle.push(self.graph[next].name.clone());
                    return Some(cycle);
                }
                Some(false) => {}
                None => {
                    if let Some(cycle) = self.visit(next, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        visited.insert(node, false);
        None
    }

    /// Kahn's algorithm over invocation counts: invoked pipelines first,
    /// names sorted within each wave.
    pub fn deployment_waves(&self) -> Result<Vec<Vec<String>>, MigrationIssue> {
        if let Some(cycle) = self.find_cycle() {
            return Err(MigrationIssue::CircularDependency { cycle });
        }

        let mut pending: HashMap<NodeIndex, usize> = self
            .nodes
            .values()
            .map(|&n| (n, self.sorted_successors(n).len()))
            .collect();
        let mut ready: Vec<NodeIndex> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut waves = Vec::new();

        while !ready.is_empty() {
            let mut wave: Vec<String> = ready.iter().map(|n| self.graph[*n].name.clone()).collect();
            wave.sort();
            let mut next_ready = Vec::new();
            for node in &ready {
                pending.remove(node);
                let mut callers: Vec<NodeIndex> =
                    self.graph.neighbors_directed(*node, Direction::Incoming).collect();
                callers.sort();
                callers.dedup();
                for caller in callers {
                    if let Some(count) = pending.get_mut(&caller) {
                        *count -= 1;
                        if *count == 0 {
                            next_ready.push(caller);
                        }
                    }
                }
            }
            waves.push(wave);
            ready = next_ready;
        }

        Ok(waves)
    }

    pub fn deployment_order(&self) -> Result<Vec<String>, MigrationIssue> {
        Ok(self.deployment_waves()?.into_iter().flatten().collect())
    }

    /// Graphviz rendering of the invocation graph.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }
}
