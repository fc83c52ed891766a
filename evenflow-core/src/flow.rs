//! Flow Composition
//!
//! [`compose`] validates a node set, plans it once, and returns a [`Flow`]:
//! an immutable, cheaply cloneable value that can be invoked any number of
//! times, from any number of tasks at once.
//!
//! A flow satisfies the [`Step`] contract itself (output = terminal name,
//! inputs = free variables), so it can be wrapped with
//! [`Node::from_step`](crate::Node::from_step) and nested in a larger graph.
//!
//! # Example
//!
//! ```rust
//! use evenflow_core::{compose, Bindings, Node, StepError};
//!
//! # tokio_test_block(async {
//! let flow = compose(vec![
//!     Node::new("a", ["s"], |b: &Bindings<i64>| Ok::<_, StepError>(*b.require("s")? + 1)),
//!     Node::new("b", ["a"], |b: &Bindings<i64>| Ok::<_, StepError>(*b.require("a")? * 2)),
//! ])
//! .unwrap();
//!
//! assert_eq!(flow.inputs(), ["s".to_string()]);
//! assert_eq!(flow.invoke_positional([4]).await.unwrap(), 10);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use tracing::{debug, debug_span, Instrument};

use crate::config::ExecutionConfig;
use crate::error::{BindingError, ComposeError, FlowError, InternalConsistencyError, StepError};
use crate::executor::{Environment, StageExecutor};
use crate::graph::{Bindings, Graph, Node, StagePlan, StagePlanner, Step, Value};

/// Compiles node sets into flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowComposer {
    config: ExecutionConfig,
}

impl FlowComposer {
    /// Create a composer with the default execution config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for every flow this composer builds.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and plan `nodes`.
    ///
    /// # Errors
    ///
    /// [`ComposeError::Graph`] if the nodes do not form a single-terminal DAG
    /// with unique outputs. [`ComposeError::Internal`] signals a planner bug.
    pub fn compose<V: Value>(
        &self,
        nodes: impl IntoIterator<Item = Node<V>>,
    ) -> Result<Flow<V>, ComposeError> {
        let graph = Graph::new(nodes)?;
        let plan = StagePlanner::new(&graph).plan()?;

        debug!(
            terminal = graph.terminal().output(),
            nodes = graph.len(),
            stages = plan.len(),
            groups = plan.group_count(),
            "composed flow"
        );

        Ok(Flow {
            inner: Arc::new(FlowInner {
                free_variables: graph.free_variables().to_vec(),
                terminal: graph.terminal().output().to_string(),
                plan,
                config: self.config,
            }),
        })
    }
}

/// Compose `nodes` with the default execution config.
pub fn compose<V: Value>(nodes: impl IntoIterator<Item = Node<V>>) -> Result<Flow<V>, ComposeError> {
    FlowComposer::new().compose(nodes)
}

struct FlowInner<V> {
    free_variables: Vec<String>,
    terminal: String,
    plan: StagePlan<V>,
    config: ExecutionConfig,
}

/// A compiled, reusable composition of nodes.
pub struct Flow<V> {
    inner: Arc<FlowInner<V>>,
}

impl<V> Clone for Flow<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Flow<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("output", &self.inner.terminal)
            .field("inputs", &self.inner.free_variables)
            .field("plan", &self.inner.plan.to_string())
            .finish()
    }
}

impl<V> Flow<V> {
    /// Name of the terminal output, which is the flow's result.
    pub fn output(&self) -> &str {
        &self.inner.terminal
    }

    /// Free variables in positional order.
    pub fn inputs(&self) -> &[String] {
        &self.inner.free_variables
    }

    /// Descriptive name, `compute_<terminal>`.
    pub fn name(&self) -> String {
        format!("compute_{}", self.inner.terminal)
    }

    /// The stage plan computed at compose time.
    pub fn plan(&self) -> &StagePlan<V> {
        &self.inner.plan
    }

    /// Every node output in the order the plan would run them one at a time.
    pub fn execution_order(&self) -> Vec<&str> {
        self.inner.plan.execution_order()
    }

    /// Execution settings used by every invocation.
    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }
}

impl<V: Value> Flow<V> {
    /// Run the flow.
    ///
    /// `args` bind free variables by position, `kwargs` by name.
    ///
    /// # Errors
    ///
    /// - [`FlowError::Binding`] if the arguments do not cover the free
    ///   variables exactly once; nothing runs in that case
    /// - [`FlowError::Execution`] naming the first node whose body failed
    pub async fn invoke(&self, args: Vec<V>, kwargs: IndexMap<String, V>) -> Result<V, FlowError> {
        let span = debug_span!("flow", terminal = %self.inner.terminal);
        self.run(args, kwargs).instrument(span).await
    }

    async fn run(&self, args: Vec<V>, kwargs: IndexMap<String, V>) -> Result<V, FlowError> {
        let initial = self.bind(args, kwargs)?;
        let executor = StageExecutor::new(&self.inner.config);
        let mut environment = executor.execute_stages(&self.inner.plan, initial).await?;
        let result = environment.take(&self.inner.terminal).ok_or_else(|| {
            InternalConsistencyError::new(format!(
                "terminal `{}` was never produced",
                self.inner.terminal
            ))
        })?;
        Ok(result)
    }

    /// Run the flow with positional arguments only.
    pub async fn invoke_positional(&self, args: impl IntoIterator<Item = V>) -> Result<V, FlowError> {
        self.invoke(args.into_iter().collect(), IndexMap::new()).await
    }

    /// Run the flow with keyword arguments only.
    pub async fn invoke_keywords<K: Into<String>>(
        &self,
        kwargs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<V, FlowError> {
        let kwargs = kwargs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.invoke(Vec::new(), kwargs).await
    }

    /// Build the initial environment from the call arguments.
    fn bind(&self, args: Vec<V>, mut kwargs: IndexMap<String, V>) -> Result<Environment<V>, BindingError> {
        let free = &self.inner.free_variables;
        if args.len() > free.len() {
            return Err(BindingError::TooManyArguments {
                expected: free.len(),
                given: args.len(),
            });
        }
        if let Some(unknown) = kwargs.keys().find(|name| !free.contains(*name)) {
            return Err(BindingError::UnexpectedArgument(unknown.clone()));
        }

        let positional = args.len();
        let mut args = args.into_iter();
        let mut bound = Vec::with_capacity(free.len());
        for (idx, name) in free.iter().enumerate() {
            let value = if idx < positional {
                if kwargs.contains_key(name) {
                    return Err(BindingError::AmbiguousArgument(name.clone()));
                }
                args.next()
            } else {
                kwargs.shift_remove(name)
            };
            let value = value.ok_or_else(|| BindingError::MissingFreeVariable(name.clone()))?;
            bound.push((name.clone(), value));
        }

        Ok(bound.into_iter().collect())
    }
}

impl<V: Value> Step<V> for Flow<V> {
    fn output(&self) -> &str {
        Flow::output(self)
    }

    fn inputs(&self) -> &[String] {
        Flow::inputs(self)
    }

    fn invoke(&self, bindings: Bindings<V>) -> BoxFuture<'static, Result<V, StepError>> {
        let flow = self.clone();
        async move {
            flow.invoke(Vec::new(), bindings.into_map())
                .await
                .map_err(StepError::from)
        }
        .boxed()
    }
}
