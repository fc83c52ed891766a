//! Stage Plan Types
//!
//! A [`StagePlan`] is an ordered list of [`Stage`]s. Stages run one after
//! another; the [`Group`]s inside a stage run concurrently; the nodes inside
//! a group run sequentially on one worker.

use std::fmt;

use smallvec::SmallVec;

use super::node::Node;

/// A chain of nodes executed in order by a single worker.
#[derive(Debug)]
pub struct Group<V> {
    nodes: SmallVec<[Node<V>; 4]>,
}

impl<V> Clone for Group<V> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
        }
    }
}

impl<V> Group<V> {
    pub(crate) fn new(nodes: SmallVec<[Node<V>; 4]>) -> Self {
        Self { nodes }
    }

    /// Nodes in execution order.
    pub fn nodes(&self) -> &[Node<V>] {
        &self.nodes
    }

    /// Output names in execution order.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(Node::output)
    }

    /// Number of nodes in the chain.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the group holds no nodes. Planned groups never do.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<V> fmt::Display for Group<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, output) in self.outputs().enumerate() {
            if idx > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(output)?;
        }
        f.write_str("]")
    }
}

/// Groups that may run concurrently.
#[derive(Debug)]
pub struct Stage<V> {
    groups: Vec<Group<V>>,
}

impl<V> Clone for Stage<V> {
    fn clone(&self) -> Self {
        Self {
            groups: self.groups.clone(),
        }
    }
}

impl<V> Stage<V> {
    pub(crate) fn new(groups: Vec<Group<V>>) -> Self {
        Self { groups }
    }

    /// Groups in this stage.
    pub fn groups(&self) -> &[Group<V>] {
        &self.groups
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the stage holds no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Outputs produced by this stage, group by group.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flat_map(Group::outputs)
    }
}

impl<V> fmt::Display for Stage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, group) in self.groups.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{group}")?;
        }
        Ok(())
    }
}

/// Ordered stages of a compiled flow.
///
/// Rendered as `[a] | [b] [c] | [d]`.
#[derive(Debug)]
pub struct StagePlan<V> {
    stages: Vec<Stage<V>>,
}

impl<V> Clone for StagePlan<V> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<V> StagePlan<V> {
    pub(crate) fn new(stages: Vec<Stage<V>>) -> Self {
        Self { stages }
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage<V>] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the plan has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Total number of groups across all stages.
    pub fn group_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    /// Every output in plan order, a valid topological order of the graph.
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages.iter().flat_map(Stage::outputs).collect()
    }

    /// Plan as nested output names: stage, then group, then chain.
    pub fn layout(&self) -> Vec<Vec<Vec<&str>>> {
        self.stages
            .iter()
            .map(|stage| {
                stage
                    .groups()
                    .iter()
                    .map(|group| group.outputs().collect())
                    .collect()
            })
            .collect()
    }
}

impl<V> fmt::Display for StagePlan<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}
