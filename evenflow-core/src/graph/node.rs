//! Graph Nodes
//!
//! This module defines the unit of computation that lives in a flow graph:
//! a named output, an ordered list of named inputs, and a body that turns
//! bound inputs into the output value.
//!
//! Anything implementing [`Step`] can take part in a graph. [`Node`] is the
//! concrete implementation built from a closure, and a compiled
//! [`Flow`](crate::Flow) implements [`Step`] too, which is how flows nest.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use smallvec::SmallVec;
use thiserror::Error;

use crate::error::{panicked, StepError};

/// Bound shared by every value that flows through a graph.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// The contract every participant of a graph satisfies.
pub trait Step<V>: Send + Sync {
    /// Name this step's result is bound to.
    fn output(&self) -> &str;

    /// Names this step reads, in declaration order.
    fn inputs(&self) -> &[String];

    /// Run the step against its bound inputs.
    fn invoke(&self, bindings: Bindings<V>) -> BoxFuture<'static, Result<V, StepError>>;
}

/// A declared input had no value when the step ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input `{0}` is not bound")]
pub struct MissingInput(pub String);

/// Values handed to one step invocation, keyed by input name.
///
/// Only the step's declared inputs are present.
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings<V> {
    values: IndexMap<String, V>,
}

impl<V> Default for Bindings<V> {
    fn default() -> Self {
        Self {
            values: IndexMap::new(),
        }
    }
}

impl<V: Clone> Bindings<V> {
    /// Collect the values for `names`, skipping any that `lookup` cannot find.
    pub(crate) fn select<'a, F>(names: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a V>,
        V: 'a,
    {
        let mut values = IndexMap::with_capacity(names.len());
        for name in names {
            if values.contains_key(name) {
                continue;
            }
            if let Some(value) = lookup(name) {
                values.insert(name.clone(), value.clone());
            }
        }
        Self { values }
    }
}

impl<V> Bindings<V> {
    /// Get the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    /// Get the value bound to `name`, or a [`MissingInput`] error.
    pub fn require(&self, name: &str) -> Result<&V, MissingInput> {
        self.values
            .get(name)
            .ok_or_else(|| MissingInput(name.to_string()))
    }

    /// Check whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of bound inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Consume the bindings, returning the underlying map.
    pub fn into_map(self) -> IndexMap<String, V> {
        self.values
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for Bindings<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

type Body<V> = dyn Fn(Bindings<V>) -> BoxFuture<'static, Result<V, StepError>> + Send + Sync;

struct NodeInner<V> {
    output: String,
    inputs: SmallVec<[String; 4]>,
    body: Box<Body<V>>,
}

/// A named unit of computation with declared inputs and one output.
///
/// Nodes are immutable once built and cheap to clone.
///
/// # Example
///
/// ```rust
/// use evenflow_core::Node;
///
/// let double = Node::new("doubled", ["x"], |b| {
///     let x: i64 = *b.require("x")?;
///     Ok::<_, evenflow_core::StepError>(x * 2)
/// });
/// assert_eq!(double.output(), "doubled");
/// assert_eq!(double.inputs(), ["x".to_string()]);
/// ```
pub struct Node<V> {
    inner: Arc<NodeInner<V>>,
}

impl<V> Clone for Node<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("output", &self.inner.output)
            .field("inputs", &self.inner.inputs)
            .finish_non_exhaustive()
    }
}

impl<V: Value> Node<V> {
    /// Create a node from a synchronous body.
    ///
    /// The body runs on tokio's blocking pool, so invoking the node requires
    /// a tokio runtime. A panic in the body is reported as a [`StepError`].
    pub fn new<I, S, F, E>(output: impl Into<String>, inputs: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Bindings<V>) -> Result<V, E> + Send + Sync + 'static,
        E: Into<StepError>,
    {
        let body = Arc::new(body);
        Self::from_parts(
            output.into(),
            inputs.into_iter().map(Into::into).collect(),
            Box::new(move |bindings: Bindings<V>| -> BoxFuture<'static, Result<V, StepError>> {
                let body = Arc::clone(&body);
                async move {
                    let blocking = tokio::task::spawn_blocking(move || -> Result<V, StepError> {
                        body(&bindings).map_err(Into::into)
                    });
                    match blocking.await {
                        Ok(result) => result,
                        Err(join_error) if join_error.is_panic() => {
                            Err(panicked(join_error.into_panic().as_ref()))
                        }
                        Err(join_error) => Err(format!("step did not complete: {join_error}").into()),
                    }
                }
                .boxed()
            }),
        )
    }

    /// Create a node from a body returning a future.
    pub fn new_async<I, S, F, Fut, E>(output: impl Into<String>, inputs: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Bindings<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<StepError>,
    {
        Self::from_parts(
            output.into(),
            inputs.into_iter().map(Into::into).collect(),
            Box::new(move |bindings: Bindings<V>| -> BoxFuture<'static, Result<V, StepError>> {
                body(bindings).map(|result| result.map_err(Into::into)).boxed()
            }),
        )
    }

    /// Wrap any [`Step`], such as a compiled flow, as a node.
    pub fn from_step<T>(step: T) -> Self
    where
        T: Step<V> + 'static,
    {
        let output = step.output().to_string();
        let inputs = step.inputs().iter().cloned().collect();
        Self::from_parts(
            output,
            inputs,
            Box::new(move |bindings: Bindings<V>| step.invoke(bindings)),
        )
    }

    fn from_parts(output: String, inputs: SmallVec<[String; 4]>, body: Box<Body<V>>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                output,
                inputs,
                body,
            }),
        }
    }
}

impl<V> Node<V> {
    /// Name this node's result is bound to.
    pub fn output(&self) -> &str {
        &self.inner.output
    }

    /// Names this node reads, in declaration order.
    pub fn inputs(&self) -> &[String] {
        &self.inner.inputs
    }

    /// Run the body.
    pub fn invoke(&self, bindings: Bindings<V>) -> BoxFuture<'static, Result<V, StepError>> {
        (self.inner.body)(bindings)
    }
}

impl<V: Value> Step<V> for Node<V> {
    fn output(&self) -> &str {
        Node::output(self)
    }

    fn inputs(&self) -> &[String] {
        Node::inputs(self)
    }

    fn invoke(&self, bindings: Bindings<V>) -> BoxFuture<'static, Result<V, StepError>> {
        Node::invoke(self, bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add() -> Node<i64> {
        Node::new("sum", ["a", "b"], |b: &Bindings<i64>| {
            Ok::<_, MissingInput>(b.require("a")? + b.require("b")?)
        })
    }

    #[test]
    fn node_exposes_declared_names() {
        let node = add();
        assert_eq!(node.output(), "sum");
        assert_eq!(node.inputs(), ["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn sync_body_reads_bindings() {
        let node = add();
        let bindings: Bindings<i64> = [("a", 2), ("b", 3)].into_iter().collect();
        assert_eq!(node.invoke(bindings).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn missing_input_surfaces_as_step_error() {
        let node = add();
        let bindings: Bindings<i64> = [("a", 2)].into_iter().collect();
        let err = node.invoke(bindings).await.unwrap_err();
        assert_eq!(err.to_string(), "input `b` is not bound");
    }

    #[tokio::test]
    async fn async_body_runs() {
        let node = Node::new_async("later", ["x"], |b: Bindings<i64>| async move {
            tokio::task::yield_now().await;
            Ok::<_, MissingInput>(*b.require("x")? + 1)
        });
        let bindings: Bindings<i64> = [("x", 41)].into_iter().collect();
        assert_eq!(node.invoke(bindings).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn from_step_keeps_contract() {
        let wrapped = Node::from_step(add());
        assert_eq!(wrapped.output(), "sum");
        assert_eq!(wrapped.inputs().len(), 2);

        let bindings: Bindings<i64> = [("a", 1), ("b", 1)].into_iter().collect();
        assert_eq!(wrapped.invoke(bindings).await.unwrap(), 2);
    }

    #[test]
    fn select_filters_and_deduplicates() {
        let names = vec!["a".to_string(), "missing".to_string(), "a".to_string()];
        let source: IndexMap<String, i64> = [("a".to_string(), 1), ("z".to_string(), 9)]
            .into_iter()
            .collect();
        let bindings = Bindings::select(&names, |name| source.get(name));
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.get("a"), Some(&1));
        assert!(!bindings.contains("z"));
    }

    #[test]
    fn clones_share_the_body() {
        let node = add();
        let copy = node.clone();
        assert!(Arc::ptr_eq(&node.inner, &copy.inner));
    }
}
