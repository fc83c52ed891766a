//! Flow Graph
//!
//! This module turns a loose set of nodes into a validated dependency graph
//! and plans it into stages.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are named computations with declared inputs
//! - Edges run from the node producing a name to every node reading it
//! - Names read but never produced are free variables, supplied per invocation
//!
//! # Design Decisions
//!
//! 1. [`Graph`] owns its nodes in topological order, so every later pass can
//!    walk forward (producers first) or backward (consumers first) by index.
//!
//! 2. Analysis is kept as pure functions in [`analysis`], separate from the
//!    owning structure, so each property can be tested on plain node slices.
//!
//! 3. Fan-out (the children map) is computed once here because the stage
//!    planner consults it for every node.

pub mod analysis;
mod node;
mod planner;
mod stage;

pub use node::{Bindings, MissingInput, Node, Step, Value};
pub use planner::StagePlanner;
pub use stage::{Group, Stage, StagePlan};

use indexmap::IndexMap;

use crate::error::GraphError;

/// A validated node set: unique outputs, acyclic, exactly one terminal.
#[derive(Debug, Clone)]
pub struct Graph<V> {
    /// Nodes in topological order.
    nodes: Vec<Node<V>>,

    /// Output name to position in `nodes`.
    positions: IndexMap<String, usize>,

    /// Output name to the outputs reading it.
    children: IndexMap<String, Vec<String>>,

    /// Free variables in lexical order.
    free_variables: Vec<String>,

    /// Position of the terminal node.
    terminal: usize,
}

impl<V> Graph<V> {
    /// Validate `nodes` and build the graph.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateOutputName`] if two nodes share an output
    /// - [`GraphError::CycleDetected`] if the nodes cannot be ordered
    /// - [`GraphError::NoTerminal`] / [`GraphError::MultipleTerminals`] unless
    ///   exactly one output is left unconsumed
    pub fn new(nodes: impl IntoIterator<Item = Node<V>>) -> Result<Self, GraphError> {
        let nodes: Vec<Node<V>> = nodes.into_iter().collect();

        if let Some(duplicate) = analysis::duplicate_outputs(&nodes).into_iter().next() {
            return Err(GraphError::DuplicateOutputName(duplicate));
        }

        let order = analysis::topological_sort(&nodes)?;

        let terminal = match analysis::terminals(&nodes).as_slice() {
            [] => return Err(GraphError::NoTerminal),
            [single] => single.output().to_string(),
            many => {
                return Err(GraphError::MultipleTerminals(
                    many.iter().map(|node| node.output().to_string()).collect(),
                ))
            }
        };

        let free_variables = analysis::free_variables(&nodes);
        let children = analysis::children(&nodes);

        let mut slots: Vec<Option<Node<V>>> = nodes.into_iter().map(Some).collect();
        let nodes: Vec<Node<V>> = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();
        let positions: IndexMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.output().to_string(), idx))
            .collect();
        let terminal = positions[terminal.as_str()];

        Ok(Self {
            nodes,
            positions,
            children,
            free_variables,
            terminal,
        })
    }

    /// All nodes, in topological order.
    pub fn nodes(&self) -> &[Node<V>] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes. A validated graph never does.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological position of the node producing `output`.
    pub fn position(&self, output: &str) -> Option<usize> {
        self.positions.get(output).copied()
    }

    /// The node producing `output`.
    pub fn node(&self, output: &str) -> Option<&Node<V>> {
        self.position(output).map(|idx| &self.nodes[idx])
    }

    /// The node whose output no other node consumes.
    pub fn terminal(&self) -> &Node<V> {
        &self.nodes[self.terminal]
    }

    /// Free variables in lexical order.
    pub fn free_variables(&self) -> &[String] {
        &self.free_variables
    }

    /// Whether `name` is a free variable rather than a node output.
    pub fn is_free(&self, name: &str) -> bool {
        !self.positions.contains_key(name)
    }

    /// Outputs of the nodes that read `output`.
    pub fn children_of(&self, output: &str) -> &[String] {
        self.children
            .get(output)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of nodes reading `output`.
    pub fn fan_out(&self, output: &str) -> usize {
        self.children_of(output).len()
    }

    /// Positions of the distinct node-produced inputs of the node at `idx`.
    pub fn dependencies(&self, idx: usize) -> Vec<usize> {
        let mut deps = Vec::new();
        for input in self.nodes[idx].inputs() {
            if let Some(pos) = self.position(input) {
                if !deps.contains(&pos) {
                    deps.push(pos);
                }
            }
        }
        deps
    }
}
