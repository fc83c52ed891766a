//! Stage Executor
//!
//! Runs a [`StagePlan`] against an [`Environment`].
//!
//! # Execution Model
//!
//! - Every group of a stage becomes one tokio task. A semaphore sized by
//!   [`ExecutionConfig::max_workers`] bounds how many of them make progress
//!   at once.
//! - Tasks share a read-only snapshot of the environment and write only to
//!   their own result map. The executor merges those maps after the last task
//!   of the stage returns, so no locks are taken while steps run.
//! - Stages are strict barriers: stage `k + 1` starts only after every task
//!   of stage `k` has finished.
//! - If any task fails, the remaining tasks of that stage still run to
//!   completion, then the first failure (in completion order) is returned and
//!   no further stage starts.

mod environment;

pub use environment::Environment;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::config::ExecutionConfig;
use crate::error::{panicked, FlowError, InternalConsistencyError, StepError};
use crate::graph::{Bindings, Group, Node, Stage, StagePlan, Value};

/// Executes stages on a bounded worker pool.
///
/// One executor serves one invocation; its pool is shared by every stage of
/// that invocation.
#[derive(Debug)]
pub struct StageExecutor {
    workers: Arc<Semaphore>,
    capacity: usize,
}

impl StageExecutor {
    /// Create an executor with the pool size from `config`.
    pub fn new(config: &ExecutionConfig) -> Self {
        let capacity = config.max_workers();
        Self {
            workers: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Worker pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run every stage of `plan` in order, starting from `initial`.
    pub async fn execute_stages<V: Value>(
        &self,
        plan: &StagePlan<V>,
        initial: Environment<V>,
    ) -> Result<Environment<V>, FlowError> {
        let mut environment = initial;
        for (index, stage) in plan.stages().iter().enumerate() {
            let span = debug_span!("stage", index, groups = stage.len());
            environment = self.execute_stage(stage, environment).instrument(span).await?;
        }
        Ok(environment)
    }

    /// Run the groups of one stage concurrently and merge their results.
    pub async fn execute_stage<V: Value>(
        &self,
        stage: &Stage<V>,
        environment: Environment<V>,
    ) -> Result<Environment<V>, FlowError> {
        let snapshot = Arc::new(environment);
        let mut tasks = JoinSet::new();

        for (position, group) in stage.groups().iter().enumerate() {
            let group = group.clone();
            let snapshot = Arc::clone(&snapshot);
            let workers = Arc::clone(&self.workers);
            tasks.spawn(
                async move {
                    let _permit = workers
                        .acquire_owned()
                        .await
                        .map_err(|_| InternalConsistencyError::new("worker pool was closed"))?;
                    let produced = run_group(&group, &snapshot).await?;
                    Ok::<_, FlowError>((position, produced))
                }
                .in_current_span(),
            );
        }

        let mut first_error: Option<FlowError> = None;
        let mut results = Vec::with_capacity(stage.len());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|join_error| {
                Err(InternalConsistencyError::new(format!(
                    "group task did not complete: {join_error}"
                ))
                .into())
            });
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        // Merge in group order so the environment does not depend on
        // completion order.
        results.sort_by_key(|(position, _)| *position);
        let mut merged = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());
        for (_, produced) in results {
            merged.merge(produced)?;
        }

        debug!(bound = merged.len(), "stage complete");
        Ok(merged)
    }
}

/// Invoke the nodes of `group` in order, returning what they produced.
async fn run_group<V: Value>(
    group: &Group<V>,
    snapshot: &Environment<V>,
) -> Result<IndexMap<String, V>, FlowError> {
    let mut produced: IndexMap<String, V> = IndexMap::with_capacity(group.len());

    for node in group.nodes() {
        let bindings = Bindings::select(node.inputs(), |name| {
            produced.get(name).or_else(|| snapshot.get(name))
        });
        trace!(output = node.output(), bound = bindings.len(), "invoking step");

        let value = invoke_node(node, bindings).await.map_err(|source| {
            warn!(output = node.output(), error = %source, "step failed");
            FlowError::Execution {
                output: node.output().to_string(),
                source,
            }
        })?;
        produced.insert(node.output().to_string(), value);
    }

    debug!(group = %group, "group complete");
    Ok(produced)
}

/// Invoke one node, turning a panic in its body into an error.
async fn invoke_node<V: Value>(node: &Node<V>, bindings: Bindings<V>) -> Result<V, StepError> {
    let future = match panic::catch_unwind(AssertUnwindSafe(|| node.invoke(bindings))) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use smallvec::smallvec;

    fn add_one(output: &str, input: &str) -> Node<i64> {
        let input = input.to_string();
        Node::new(output, [input.clone()], move |b: &Bindings<i64>| {
            Ok::<_, StepError>(*b.require(&input)? + 1)
        })
    }

    /// Node that records how many nodes are running at once.
    fn tracked(output: &str, running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Node<i64> {
        Node::new_async(output, ["s"], move |_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, StepError>(0)
            }
        })
    }

    #[tokio::test]
    async fn group_runs_its_chain_in_order() {
        let stage = Stage::new(vec![Group::new(smallvec![
            add_one("a", "s"),
            add_one("b", "a"),
            add_one("c", "b"),
        ])]);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let env = StageExecutor::new(&ExecutionConfig::new())
            .execute_stage(&stage, env)
            .await
            .unwrap();

        assert_eq!(env.get("c"), Some(&3));
        assert_eq!(env.names().collect::<Vec<_>>(), vec!["s", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn groups_merge_in_stage_order() {
        let stage = Stage::new(vec![
            Group::new(smallvec![add_one("x", "s")]),
            Group::new(smallvec![add_one("y", "s")]),
        ]);
        let env: Environment<i64> = [("s", 10)].into_iter().collect();

        let env = StageExecutor::new(&ExecutionConfig::new())
            .execute_stage(&stage, env)
            .await
            .unwrap();

        assert_eq!(env.names().collect::<Vec<_>>(), vec!["s", "x", "y"]);
        assert_eq!(env.get("y"), Some(&11));
    }

    #[tokio::test]
    async fn pool_capacity_bounds_concurrency() {
        for (workers, expected_peak) in [(1, 1), (10, 3)] {
            let running = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let groups = ["a", "b", "c"]
                .into_iter()
                .map(|name| {
                    Group::new(smallvec![tracked(name, Arc::clone(&running), Arc::clone(&peak))])
                })
                .collect();
            let stage = Stage::new(groups);
            let env: Environment<i64> = [("s", 0)].into_iter().collect();

            let executor = StageExecutor::new(&ExecutionConfig::new().with_max_workers(workers));
            assert_eq!(executor.capacity(), workers);
            executor.execute_stage(&stage, env).await.unwrap();

            assert_eq!(peak.load(Ordering::SeqCst), expected_peak);
        }
    }

    #[tokio::test]
    async fn blocking_bodies_are_bounded_by_the_pool() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let groups = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                Group::new(smallvec![Node::new(name, ["s"], move |_| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, StepError>(0i64)
                })])
            })
            .collect();
        let stage = Stage::new(groups);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let executor = StageExecutor::new(&ExecutionConfig::new().with_max_workers(2));
        executor.execute_stage(&stage, env).await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_waits_for_in_flight_groups() {
        let sibling_done = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&sibling_done);
        let slow = Node::new_async("slow", ["s"], move |_| {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                done.store(true, Ordering::SeqCst);
                Ok::<_, StepError>(1)
            }
        });
        let failing = Node::new("bad", ["s"], |_| Err::<i64, _>("no luck"));
        let stage = Stage::new(vec![
            Group::new(smallvec![failing]),
            Group::new(smallvec![slow]),
        ]);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let err = StageExecutor::new(&ExecutionConfig::new())
            .execute_stage(&stage, env)
            .await
            .unwrap_err();

        assert_eq!(err.failed_output(), Some("bad"));
        assert!(sibling_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn later_stages_do_not_start_after_a_failure() {
        let reached = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reached);
        let plan = StagePlan::new(vec![
            Stage::new(vec![Group::new(smallvec![Node::new("a", ["s"], |_| {
                Err::<i64, _>("stop")
            })])]),
            Stage::new(vec![Group::new(smallvec![Node::new("b", ["a"], move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, StepError>(0)
            })])]),
        ]);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let result = StageExecutor::new(&ExecutionConfig::new())
            .execute_stages(&plan, env)
            .await;

        assert!(matches!(result, Err(FlowError::Execution { ref output, .. }) if output == "a"));
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_step_is_an_execution_error() {
        let stage = Stage::new(vec![Group::new(smallvec![
            add_one("a", "s"),
            Node::new("b", ["a"], |_| -> Result<i64, StepError> { panic!("kaboom") }),
        ])]);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let err = StageExecutor::new(&ExecutionConfig::new())
            .execute_stage(&stage, env)
            .await
            .unwrap_err();

        assert_eq!(err.failed_output(), Some("b"));
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn colliding_outputs_are_internal_errors() {
        let stage = Stage::new(vec![
            Group::new(smallvec![add_one("x", "s")]),
            Group::new(smallvec![add_one("x", "s")]),
        ]);
        let env: Environment<i64> = [("s", 0)].into_iter().collect();

        let err = StageExecutor::new(&ExecutionConfig::new())
            .execute_stage(&stage, env)
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Internal(_)));
    }
}
