//! Graph Analysis
//!
//! Pure functions over a node set. Nothing here mutates or caches; the
//! [`Graph`](super::Graph) type calls them once and keeps the results.

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};

use super::node::Node;
use crate::error::GraphError;

/// Union of every node's declared inputs, in first-seen order.
pub fn inputs<V>(nodes: &[Node<V>]) -> IndexSet<&str> {
    nodes
        .iter()
        .flat_map(|node| node.inputs().iter().map(String::as_str))
        .collect()
}

/// Every node's output name, in node order.
pub fn outputs<V>(nodes: &[Node<V>]) -> IndexSet<&str> {
    nodes.iter().map(Node::output).collect()
}

/// Output names declared by more than one node, sorted.
pub fn duplicate_outputs<V>(nodes: &[Node<V>]) -> Vec<String> {
    let mut seen = IndexSet::with_capacity(nodes.len());
    let mut duplicates = BTreeSet::new();
    for node in nodes {
        if !seen.insert(node.output()) {
            duplicates.insert(node.output().to_string());
        }
    }
    duplicates.into_iter().collect()
}

/// Inputs that no node produces, in lexical order.
///
/// The order defines the positional-argument contract of a compiled flow.
pub fn free_variables<V>(nodes: &[Node<V>]) -> Vec<String> {
    let outputs = outputs(nodes);
    inputs(nodes)
        .into_iter()
        .filter(|name| !outputs.contains(name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Nodes whose output no other node consumes.
pub fn terminals<V>(nodes: &[Node<V>]) -> Vec<&Node<V>> {
    let inputs = inputs(nodes);
    nodes
        .iter()
        .filter(|node| !inputs.contains(node.output()))
        .collect()
}

/// Order the nodes so that every node comes after the producers of its inputs.
///
/// Returns positions into `nodes`. Each round selects, in the caller's order,
/// every remaining node whose inputs are all available, then makes their
/// outputs available for the next round.
///
/// # Errors
///
/// [`GraphError::CycleDetected`] if a round selects nothing while nodes remain.
pub fn topological_sort<V>(nodes: &[Node<V>]) -> Result<Vec<usize>, GraphError> {
    let produced = outputs(nodes);
    let mut available: IndexSet<&str> = inputs(nodes)
        .into_iter()
        .filter(|name| !produced.contains(name))
        .collect();
    let mut remaining: Vec<usize> = (0..nodes.len()).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining.into_iter().partition(|&idx| {
            nodes[idx]
                .inputs()
                .iter()
                .all(|input| available.contains(input.as_str()))
        });

        if ready.is_empty() {
            return Err(GraphError::CycleDetected {
                remaining: blocked
                    .iter()
                    .map(|&idx| nodes[idx].output().to_string())
                    .collect(),
            });
        }

        available.extend(ready.iter().map(|&idx| nodes[idx].output()));
        order.extend(ready);
        remaining = blocked;
    }

    Ok(order)
}

/// Map from each output to the outputs of the nodes that read it.
///
/// Every output has an entry, empty for the terminal. A consumer is listed
/// once even if it names the same input twice.
pub fn children<V>(nodes: &[Node<V>]) -> IndexMap<String, Vec<String>> {
    let mut children: IndexMap<String, Vec<String>> = nodes
        .iter()
        .map(|node| (node.output().to_string(), Vec::new()))
        .collect();

    for node in nodes {
        let distinct: IndexSet<&str> = node.inputs().iter().map(String::as_str).collect();
        for input in distinct {
            if let Some(consumers) = children.get_mut(input) {
                consumers.push(node.output().to_string());
            }
        }
    }

    children
}
