//! Stage Planner
//!
//! The planner decides which nodes share a worker and which stage each
//! worker's chain runs in.
//!
//! # Algorithm
//!
//! Nodes are visited in reverse topological order, walking from the terminal
//! back toward the free variables. Each node carries a settled marker holding
//! the reverse stage index that absorbed it.
//!
//! 1. An unsettled node is the tail of a new group.
//! 2. The group folds backward: while the current head has exactly one
//!    node-produced input `P`, `P` has fan-out 1, and `P` is unsettled, `P`
//!    becomes the new head. Folding stops at a chain head (free variables
//!    only), a join point (two or more node-produced inputs), or a shared
//!    predecessor (fan-out above 1).
//! 3. The group's reverse stage index is 0 for the terminal, otherwise one
//!    more than the largest index of any group reading the tail. Consumers
//!    come later in topological order, so they are always settled first.
//!
//! A join point therefore lands in a stage after every group feeding it, and
//! a shared predecessor closes its own group ahead of all its consumers.
//! The stages are built in reverse and flipped at the end.
//!
//! The finished plan is checked against the graph before it is returned.

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::trace;

use super::stage::{Group, Stage, StagePlan};
use super::Graph;
use crate::error::InternalConsistencyError;

/// A group as planned: member positions head first, plus its reverse stage.
struct PlannedGroup {
    members: SmallVec<[usize; 4]>,
    reverse_stage: usize,
}

/// Builds a [`StagePlan`] for a validated [`Graph`].
pub struct StagePlanner<'g, V> {
    graph: &'g Graph<V>,
}

impl<'g, V> StagePlanner<'g, V> {
    /// Create a planner over `graph`.
    pub fn new(graph: &'g Graph<V>) -> Self {
        Self { graph }
    }

    /// Compute the stage plan.
    ///
    /// # Errors
    ///
    /// [`InternalConsistencyError`] if the plan breaks one of its guarantees.
    /// The graph has already been validated, so this is always a planner bug.
    pub fn plan(&self) -> Result<StagePlan<V>, InternalConsistencyError> {
        let count = self.graph.len();
        let mut settled: Vec<Option<usize>> = vec![None; count];
        let mut planned: Vec<PlannedGroup> = Vec::new();

        for tail in (0..count).rev() {
            if settled[tail].is_some() {
                continue;
            }

            let reverse_stage = self.consumer_depth(tail, &settled)?;
            let members = self.fold_backward(tail, &settled);
            for &member in &members {
                settled[member] = Some(reverse_stage);
            }

            trace!(
                tail = self.graph.nodes()[tail].output(),
                chain = members.len(),
                reverse_stage,
                "planned group"
            );
            planned.push(PlannedGroup {
                members,
                reverse_stage,
            });
        }

        let plan = self.assemble(planned);
        self.verify(&plan)?;
        Ok(plan)
    }

    /// Reverse stage index for a group ending at `tail`.
    fn consumer_depth(
        &self,
        tail: usize,
        settled: &[Option<usize>],
    ) -> Result<usize, InternalConsistencyError> {
        let node = &self.graph.nodes()[tail];
        let consumers = self.graph.children_of(node.output());

        if consumers.is_empty() {
            if tail != self.graph.terminal {
                return Err(InternalConsistencyError::new(format!(
                    "`{}` has no consumers but is not the terminal",
                    node.output()
                )));
            }
            return Ok(0);
        }

        let mut depth = 0;
        for consumer in consumers {
            let stage = self
                .graph
                .position(consumer)
                .and_then(|pos| settled[pos])
                .ok_or_else(|| {
                    InternalConsistencyError::new(format!(
                        "consumer `{consumer}` of `{}` was not planned before its producer",
                        node.output()
                    ))
                })?;
            depth = depth.max(stage + 1);
        }
        Ok(depth)
    }

    /// Extend a chain backward from `tail` along single-parent, fan-out-1 links.
    fn fold_backward(&self, tail: usize, settled: &[Option<usize>]) -> SmallVec<[usize; 4]> {
        let mut chain: SmallVec<[usize; 4]> = SmallVec::new();
        chain.push(tail);

        let mut head = tail;
        loop {
            let deps = self.graph.dependencies(head);
            let [parent] = deps.as_slice() else {
                break;
            };
            let parent = *parent;
            let parent_output = self.graph.nodes()[parent].output();
            if self.graph.fan_out(parent_output) != 1 || settled[parent].is_some() {
                break;
            }
            chain.push(parent);
            head = parent;
        }

        chain.reverse();
        chain
    }

    /// Bucket planned groups by stage and order each stage by head position.
    fn assemble(&self, planned: Vec<PlannedGroup>) -> StagePlan<V> {
        let stage_count = planned
            .iter()
            .map(|group| group.reverse_stage + 1)
            .max()
            .unwrap_or(0);

        let mut buckets: Vec<Vec<PlannedGroup>> = (0..stage_count).map(|_| Vec::new()).collect();
        for group in planned {
            let index = stage_count - 1 - group.reverse_stage;
            buckets[index].push(group);
        }

        let nodes = self.graph.nodes();
        let stages = buckets
            .into_iter()
            .map(|mut bucket| {
                bucket.sort_by_key(|group| group.members[0]);
                Stage::new(
                    bucket
                        .into_iter()
                        .map(|group| {
                            Group::new(group.members.iter().map(|&idx| nodes[idx].clone()).collect())
                        })
                        .collect(),
                )
            })
            .collect();

        StagePlan::new(stages)
    }

    /// Check that the plan covers every node once and never reads ahead.
    fn verify(&self, plan: &StagePlan<V>) -> Result<(), InternalConsistencyError> {
        let mut available: IndexSet<&str> = self
            .graph
            .free_variables()
            .iter()
            .map(String::as_str)
            .collect();
        let mut placed = 0usize;

        for (index, stage) in plan.stages().iter().enumerate() {
            if stage.is_empty() {
                return Err(InternalConsistencyError::new(format!(
                    "stage {index} has no groups"
                )));
            }

            let mut produced: IndexSet<&str> = IndexSet::new();
            for group in stage.groups() {
                let mut local: IndexSet<&str> = IndexSet::new();
                for node in group.nodes() {
                    for input in node.inputs() {
                        let input = input.as_str();
                        if !available.contains(input) && !local.contains(input) {
                            return Err(InternalConsistencyError::new(format!(
                                "`{}` in stage {index} reads `{input}` before it is produced",
                                node.output()
                            )));
                        }
                    }
                    local.insert(node.output());
                    if !produced.insert(node.output()) || available.contains(node.output()) {
                        return Err(InternalConsistencyError::new(format!(
                            "`{}` is planned more than once",
                            node.output()
                        )));
                    }
                    placed += 1;
                }
            }
            available.extend(produced);
        }

        if placed != self.graph.len() {
            return Err(InternalConsistencyError::new(format!(
                "plan places {placed} of {} nodes",
                self.graph.len()
            )));
        }
        Ok(())
    }
}
