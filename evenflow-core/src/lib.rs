//! Evenflow Core
//!
//! This crate composes named steps into a dependency graph and runs it with
//! bounded parallelism. It implements:
//!
//! - Graph analysis (free variables, terminals, topological order)
//! - Stage planning that folds linear chains onto a single worker
//! - A staged executor on a bounded tokio worker pool
//! - Reusable, nestable compiled flows
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Nodes, validation, and the stage planner
//! - `executor`: Stage-by-stage execution and the invocation environment
//! - `flow`: The composer and the compiled [`Flow`] type
//! - `config`: Execution settings
//! - `error`: Error types for each phase
//!
//! # Example
//!
//! ```rust
//! use evenflow_core::{compose, Bindings, Node, StepError};
//!
//! let flow = compose(vec![
//!     Node::new("area", ["w", "h"], |b: &Bindings<f64>| {
//!         Ok::<_, StepError>(b.require("w")? * b.require("h")?)
//!     }),
//!     Node::new("cost", ["area", "price"], |b: &Bindings<f64>| {
//!         Ok::<_, StepError>(b.require("area")? * b.require("price")?)
//!     }),
//! ])
//! .unwrap();
//!
//! assert_eq!(flow.name(), "compute_cost");
//! assert_eq!(flow.inputs(), ["h", "price", "w"]);
//! assert_eq!(flow.plan().to_string(), "[area -> cost]");
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let cost = runtime
//!     .block_on(flow.invoke_keywords([("w", 2.0), ("h", 3.0), ("price", 1.5)]))
//!     .unwrap();
//! assert_eq!(cost, 9.0);
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod flow;
pub mod graph;

pub use config::{ExecutionConfig, DEFAULT_MAX_WORKERS};
pub use error::{
    BindingError, ComposeError, FlowError, GraphError, InternalConsistencyError, StepError,
};
pub use executor::{Environment, StageExecutor};
pub use flow::{compose, Flow, FlowComposer};
pub use graph::{
    Bindings, Graph, Group, MissingInput, Node, Stage, StagePlan, StagePlanner, Step, Value,
};
