//! Error Types
//!
//! Errors are split by the phase that raises them:
//!
//! - [`GraphError`]: the node set cannot be compiled. Raised by compose,
//!   before any stage plan exists, wrapped in [`ComposeError`].
//! - [`BindingError`]: the arguments of one invocation do not match the
//!   flow's free variables. Raised before any step runs.
//! - [`FlowError::Execution`]: a step body failed while a stage was running.
//! - [`InternalConsistencyError`]: a planner or merge invariant was violated.
//!   This is always a defect in this crate, never a problem with user input.
//!
//! None of these leave a compiled [`Flow`](crate::Flow) in an unusable state.

use std::any::Any;

use thiserror::Error;

/// Error type returned by step bodies.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?`, including
/// the [`FlowError`] of a nested flow.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Turn a panic payload into the error of the step that panicked.
pub(crate) fn panicked(payload: &(dyn Any + Send)) -> StepError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("step panicked: {message}").into()
}

/// The node set does not describe a single-terminal DAG.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Some nodes can never become ready because they depend on each other.
    #[error("graph contains a cycle through: {}", .remaining.join(", "))]
    CycleDetected {
        /// Outputs of the nodes that could not be ordered.
        remaining: Vec<String>,
    },

    /// More than one node's output is left unconsumed.
    #[error("flow must terminate in exactly one result, found: {}", .0.join(", "))]
    MultipleTerminals(Vec<String>),

    /// Every output is consumed by some other node, or there are no nodes.
    #[error("flow has no terminal output")]
    NoTerminal,

    /// Two or more nodes declare the same output name.
    #[error("output `{0}` is produced by more than one node")]
    DuplicateOutputName(String),
}

/// Invocation arguments do not line up with the flow's free variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// A free variable received no value.
    #[error("missing value for free variable `{0}`")]
    MissingFreeVariable(String),

    /// A free variable received both a positional and a keyword value.
    #[error("free variable `{0}` bound both positionally and by keyword")]
    AmbiguousArgument(String),

    /// More positional values than free variables.
    #[error("flow takes {expected} positional arguments but {given} were given")]
    TooManyArguments {
        /// Number of free variables.
        expected: usize,
        /// Number of positional values supplied.
        given: usize,
    },

    /// A keyword value names something that is not a free variable.
    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),
}

/// A planner or merge invariant was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("internal consistency error: {0}")]
pub struct InternalConsistencyError(pub String);

impl InternalConsistencyError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors raised while compiling a node set into a flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// The nodes do not form a valid graph.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The planner produced a plan that breaks its own guarantees.
    #[error(transparent)]
    Internal(#[from] InternalConsistencyError),
}

/// Errors raised while invoking a compiled flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The arguments could not be bound to free variables.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A step body returned an error (or panicked).
    #[error("step producing `{output}` failed: {source}")]
    Execution {
        /// Output name of the failing node.
        output: String,
        /// The error returned by the step body.
        #[source]
        source: StepError,
    },

    /// The executor detected a broken planner guarantee.
    #[error(transparent)]
    Internal(#[from] InternalConsistencyError),
}

impl FlowError {
    /// Output name of the failing node, for execution failures.
    pub fn failed_output(&self) -> Option<&str> {
        match self {
            Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_messages_name_the_nodes() {
        let err = GraphError::MultipleTerminals(vec!["b".into(), "c".into()]);
        assert_eq!(
            err.to_string(),
            "flow must terminate in exactly one result, found: b, c"
        );

        let err = GraphError::CycleDetected {
            remaining: vec!["x".into(), "y".into()],
        };
        assert!(err.to_string().contains("x, y"));
    }

    #[test]
    fn compose_error_is_transparent() {
        let err: ComposeError = GraphError::DuplicateOutputName("a".into()).into();
        assert_eq!(err.to_string(), "output `a` is produced by more than one node");
        assert_eq!(err, ComposeError::Graph(GraphError::DuplicateOutputName("a".into())));
    }

    #[test]
    fn execution_error_exposes_failed_output() {
        let err = FlowError::Execution {
            output: "x2".into(),
            source: "boom".into(),
        };
        assert_eq!(err.failed_output(), Some("x2"));
        assert!(err.to_string().contains("boom"));

        let err: FlowError = BindingError::MissingFreeVariable("s".into()).into();
        assert_eq!(err.failed_output(), None);
    }

    #[test]
    fn flow_error_converts_into_step_error() {
        let err: FlowError = InternalConsistencyError::new("merge collision").into();
        let boxed: StepError = err.into();
        assert!(boxed.to_string().contains("merge collision"));
    }
}
