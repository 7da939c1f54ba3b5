//! Error types for the dataflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort a resolution run or reject a graph edit
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node already being resolved was reached again through its inputs
    #[error("Cycle detected: '{node}' depends on '{upstream}', which is already being resolved")]
    Cycle { node: String, upstream: String },

    /// The node's pre-run validation reported problems
    #[error("Node '{node}' failed validation: {}", .problems.join("; "))]
    Validation { node: String, problems: Vec<String> },

    /// The node's unit of work failed
    #[error("Node '{node}' failed to execute: {source}")]
    Execution {
        node: String,
        #[source]
        source: TaskError,
    },

    /// Node not present in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The focus stack grew past the configured ceiling
    #[error("Focus stack exceeded the maximum depth of {limit}")]
    FocusDepthExceeded { limit: usize },

    /// Peeked or popped an empty focus stack
    #[error("Focus stack is empty")]
    EmptyFocusStack,

    /// `tick` called before `start`
    #[error("Resolution has not been started")]
    NotStarted,

    /// `start` called while a previous run is still in progress
    #[error("A resolution run is already in progress")]
    AlreadyRunning,

    /// Graph construction error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an execution error for a node
    pub fn execution(node: impl Into<String>, source: TaskError) -> Self {
        Self::Execution {
            node: node.into(),
            source,
        }
    }

    /// Name of the node the error is attributed to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Cycle { node, .. }
            | Self::Validation { node, .. }
            | Self::Execution { node, .. } => Some(node),
            Self::NodeNotFound(node) => Some(node),
            _ => None,
        }
    }
}

/// Errors raised while wiring a graph together
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Node '{node}' has no parameter '{parameter}'")]
    UnknownParameter { node: String, parameter: String },

    #[error("Parameter '{parameter}' on node '{node}' cannot be used as an {direction}")]
    WrongDirection {
        node: String,
        parameter: String,
        direction: &'static str,
    },

    #[error("Cannot connect {source_type} to {target_type}")]
    IncompatibleTypes {
        source_type: String,
        target_type: String,
    },

    #[error("Parameter '{parameter}' on node '{node}' already has an incoming connection")]
    AlreadyConnected { node: String, parameter: String },

    #[error("Node '{node}' already belongs to group '{group}'")]
    AlreadyGrouped { node: String, group: String },

    #[error("Duplicate node name '{0}'")]
    DuplicateNode(String),
}

/// Errors returned by node executors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Generic failure reported by the node
    #[error("{0}")]
    Failed(String),

    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Invalid input type
    #[error("Invalid input type for '{parameter}': expected {expected}")]
    InvalidInputType { parameter: String, expected: String },

    /// The executor does not handle this node type
    #[error("No executor handles node type '{node_type}'")]
    Unhandled { node_type: String },

    /// The spawned task panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_problems() {
        let err = EngineError::Validation {
            node: "blur".to_string(),
            problems: vec!["missing image".to_string(), "radius < 0".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Node 'blur' failed validation: missing image; radius < 0"
        );
        assert_eq!(err.node(), Some("blur"));
    }

    #[test]
    fn test_execution_error_keeps_source() {
        let err = EngineError::execution("encode", TaskError::failed("ffmpeg exited with 1"));
        assert_eq!(err.to_string(), "Node 'encode' failed to execute: ffmpeg exited with 1");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "ffmpeg exited with 1");
    }

    #[test]
    fn test_cycle_names_both_nodes() {
        let err = EngineError::Cycle {
            node: "a".to_string(),
            upstream: "b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'b'"));
    }
}
