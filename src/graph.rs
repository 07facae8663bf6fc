use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use crate::definition::ModuleDefinition;
use crate::types::{Dependency, DependencyKind};

/// Static view of the modules declared by a set of definition files.
pub struct DependencyGraph {
    graph: DiGraph<Node, Edge>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create a graph where each module is a node and each dependency is an
    /// edge from the dependency to its dependent.
    pub fn build(definitions: &[ModuleDefinition]) -> Result<Self> {
        let mut graph = DiGraph::<Node, Edge>::new();
        let mut node_map = HashMap::<String, NodeIndex>::new();

        for definition in definitions {
            if node_map.contains_key(&definition.name) {
                return Err(anyhow::anyhow!(
                    "Duplicate definition name: '{}'",
                    definition.name
                ));
            }
            let index = graph.add_node(Node::Module(definition.clone()));
            node_map.insert(definition.name.clone(), index);
        }

        for definition in definitions {
            let target_index = node_map[&definition.name];
            for Dependency { kind, name, .. } in definition.dependencies() {
                if name == definition.name {
                    return Err(anyhow::anyhow!(
                        "Module '{}' cannot depend on itself",
                        definition.name
                    ));
                }
                let source_index = match node_map.get(&name) {
                    Some(index) => *index,
                    None => {
                        tracing::warn!(
                            "Module '{}' depends on '{}', which is not defined",
                            definition.name,
                            name
                        );
                        let index = graph.add_node(Node::External(name.clone()));
                        node_map.insert(name, index);
                        index
                    }
                };
                graph.update_edge(source_index, target_index, Edge::from(kind));
            }
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let node_name = graph[cycle.node_id()].name();
            return Err(anyhow::anyhow!(
                "Circular dependency detected involving '{node_name}'"
            ));
        }

        Ok(Self { graph, node_map })
    }

    /// Modules in an order where every dependency precedes its dependents.
    pub fn build_order(&self) -> Vec<&str> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| self.graph[i].name()).collect())
            .unwrap_or_default()
    }

    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.node_map.get(name).map(|index| &self.graph[*index])
    }

    /// Names `name` depends on, with the edge kind.
    pub fn get_dependencies(&self, name: &str) -> Vec<(&str, &Edge)> {
        let Some(index) = self.node_map.get(name) else {
            return Vec::new();
        };
        let mut dependencies: Vec<_> = self
            .graph
            .edges_directed(*index, petgraph::Direction::Incoming)
            .map(|edge| (self.graph[edge.source()].name(), edge.weight()))
            .collect();
        dependencies.sort_by_key(|(name, _)| *name);
        dependencies
    }

    /// Write the graph to a DOT file
    pub fn write_dot_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.dot())
            .map_err(|e| anyhow::anyhow!("Failed to write DOT file: {e}"))?;
        Ok(())
    }

    pub fn dot(&self) -> String {
        let mut output = String::from("digraph DependencyGraph {\n");
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [fontname=\"Arial\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Arial\", fontsize=9];\n");

        for node_index in self.graph.node_indices() {
            let node_attrs = match &self.graph[node_index] {
                Node::Module(def) => {
                    let color = if def.uses.is_empty() && def.is.is_empty() {
                        "lightgreen"
                    } else {
                        "lightblue"
                    };
                    let label = match &def.alias {
                        Some(alias) => format!("{}\\n(alias: {alias})", def.name),
                        None => def.name.clone(),
                    };
                    format!(
                        "[label=\"{label}\", shape=box, fillcolor={color}, style=\"rounded,filled\"]"
                    )
                }
                Node::External(name) => format!(
                    "[label=\"{name}\", shape=ellipse, fillcolor=orange, style=\"dashed,filled\"]"
                ),
            };
            output.push_str(&format!("  {} {};\n", node_index.index(), node_attrs));
        }

        for edge_ref in self.graph.edge_references() {
            let edge_attrs = match edge_ref.weight() {
                Edge::Use => "[color=blue, style=solid]",
                Edge::Is => "[color=red, style=dashed, label=\"is\"]",
            };
            output.push_str(&format!(
                "  {} -> {} {};\n",
                edge_ref.source().index(),
                edge_ref.target().index(),
                edge_attrs
            ));
        }

        output.push_str("}\n");
        output
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<_> = self.graph.raw_nodes().iter().map(|n| &n.weight).collect();
        let edges: Vec<String> = self
            .graph
            .edge_references()
            .map(|edge| {
                format!(
                    "{} -> {} ({:?})",
                    self.graph[edge.source()].name(),
                    self.graph[edge.target()].name(),
                    edge.weight()
                )
            })
            .collect();
        f.debug_struct("DependencyGraph")
            .field("nodes", &nodes)
            .field("edges", &edges)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Module(ModuleDefinition),
    /// Referenced but not defined by any file; expected from autoloading.
    External(String),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Module(def) => &def.name,
            Node::External(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Use,
    Is,
}

impl From<DependencyKind> for Edge {
    fn from(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Use => Edge::Use,
            DependencyKind::Is => Edge::Is,
        }
    }
}

/// Groups of names that wait on each other, given `(waiter, dependency)`
/// edges. Each group is sorted, and the groups are sorted.
pub(crate) fn find_cycles(edges: &[(String, String)]) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut node_map = HashMap::<&str, NodeIndex>::new();
    for (from, to) in edges {
        let from_index = *node_map
            .entry(from.as_str())
            .or_insert_with(|| graph.add_node(from.as_str()));
        let to_index = *node_map
            .entry(to.as_str())
            .or_insert_with(|| graph.add_node(to.as_str()));
        graph.update_edge(from_index, to_index, ());
    }

    let mut cycles: Vec<Vec<String>> = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .map(|component| {
            let mut names: Vec<String> =
                component.into_iter().map(|i| graph[i].to_string()).collect();
            names.sort();
            names
        })
        .collect();
    cycles.sort();
    cycles
}
