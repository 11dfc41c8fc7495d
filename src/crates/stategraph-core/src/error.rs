//! Error types for graph construction and execution.

use thiserror::Error;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced while building, compiling, or executing a graph.
///
/// Node failures are wrapped with the node name so the orchestration layer
/// can return a structured error envelope instead of a bare message.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph structure is invalid (missing node, dangling edge, unreachable END).
    #[error("Invalid graph: {0}")]
    Validation(String),

    /// A node executor returned an error.
    #[error("Node '{node}' failed: {message}")]
    NodeExecution {
        /// Name of the failing node.
        node: String,
        /// Error message from the node executor.
        message: String,
    },

    /// A conditional router returned a branch key that is not declared.
    #[error("Router at '{node}' returned undeclared branch '{branch}'")]
    UndeclaredBranch {
        /// Node owning the conditional edge.
        node: String,
        /// The branch key the router produced.
        branch: String,
    },

    /// A node has no outgoing edge during execution.
    #[error("Node '{0}' has no outgoing edge")]
    DeadEnd(String),

    /// State merge failed.
    #[error("State error: {0}")]
    State(#[from] crate::state::StateError),

    /// Checkpoint persistence failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),

    /// The step bound was exceeded (likely a routing cycle).
    #[error("Execution exceeded {0} steps")]
    MaxStepsExceeded(usize),
}

impl GraphError {
    /// Wrap an arbitrary node error with its node name.
    pub fn node<E: std::fmt::Display>(node: impl Into<String>, err: E) -> Self {
        GraphError::NodeExecution {
            node: node.into(),
            message: err.to_string(),
        }
    }
}
