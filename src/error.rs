//! Error types, one enum per failure domain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection reasons raised while building or validating a task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The graph contains a dependency cycle. `cycle` lists the member task
    /// ids in traversal order; a self-dependency yields a one-element cycle.
    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },
}

/// Failure vocabulary for [`AgentExecutor`](crate::executor::AgentExecutor)
/// implementations. The orchestrator never retries; each of these is final
/// for the task that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorError {
    #[error("Rate limited by the model provider")]
    RateLimited,

    #[error("Provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        ExecutorError::Provider(format!("{err:#}"))
    }
}

/// Raised when the scheduling loop can no longer make progress. Should be
/// unreachable once graph validation has passed; if it fires anyway the run
/// is aborted rather than left hanging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Scheduler deadlock: {} task(s) stuck with nothing ready or running: {}", .pending.len(), .pending.join(", "))]
    Deadlock { pending: Vec<String> },
}

/// Workflow template loading and resolution errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Unresolved placeholder '{{{{{placeholder}}}}}' in task '{task}'")]
    UnresolvedPlaceholder { task: String, placeholder: String },

    #[error("Failed to parse workflow definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid orchestrator configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}
