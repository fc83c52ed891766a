//! Execution Configuration
//!
//! Options that control how a compiled flow runs. The stage plan itself is
//! independent of these settings; they only affect the executor.

use serde::{Deserialize, Serialize};

/// Default number of groups that may run at the same time.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Configuration for flow execution.
///
/// # Examples
///
/// ```rust
/// use evenflow_core::ExecutionConfig;
///
/// let config = ExecutionConfig::new().with_max_workers(4);
/// assert_eq!(config.max_workers(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Capacity of the worker pool used by one invocation.
    ///
    /// Groups of a stage beyond this number wait for a free worker.
    #[serde(default = "default_max_workers")]
    max_workers: usize,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionConfig {
    /// Creates a configuration with [`DEFAULT_MAX_WORKERS`] workers.
    pub fn new() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Sets the worker pool capacity. Zero is treated as one.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Effective worker pool capacity, never less than one.
    pub fn max_workers(&self) -> usize {
        self.max_workers.max(1)
    }
}
