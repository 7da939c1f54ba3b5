//! Execution adapter
//!
//! The engine never runs node logic itself. It builds a [`NodeTask`] for
//! the node in focus and hands it to a [`TaskExecutor`], spawning the
//! returned future as a cancellable task owned by the focus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::focus::RunningTask;
use crate::groups::ExecutionEnvironment;
use crate::types::{NodeId, NodeOutputs};

/// Everything an executor gets to know about the node it runs
#[derive(Debug, Clone)]
pub struct NodeTask {
    /// Node name
    pub node: NodeId,
    /// Node type, used to pick a handler
    pub node_type: String,
    /// Input values keyed by parameter name
    pub inputs: NodeOutputs,
    /// Set when the node is a group executed as one unit
    pub group: Option<GroupTask>,
    /// Cancelled when the run is cancelled; long-running work should watch it
    pub cancel: CancellationToken,
}

impl NodeTask {
    pub fn new(node: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            node_type: node_type.into(),
            inputs: NodeOutputs::new(),
            group: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: NodeOutputs) -> Self {
        self.inputs = inputs;
        self
    }

    /// Get an input value
    pub fn input(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs.get(name)
    }

    /// Get an input value, failing with `MissingInput`
    pub fn require_input(&self, name: &str) -> Result<&serde_json::Value, TaskError> {
        self.inputs
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_string()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Extra context handed over when an atomic group runs
#[derive(Debug, Clone)]
pub struct GroupTask {
    /// Environment the group asked to run in
    pub execution_environment: ExecutionEnvironment,
    /// Every node nested in the group, depth-first
    pub members: Vec<NodeId>,
}

/// Runs the unit of work behind a node
///
/// Implementations are external collaborators: model pipelines, media
/// tools, remote API clients. The engine only cares whether the returned
/// future succeeds, fails or is cancelled.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute a node and return its output values
    async fn execute_task(&self, task: NodeTask) -> Result<NodeOutputs, TaskError>;

    /// Node-type specific checks run before the node executes
    ///
    /// Returns human-readable problems; an empty list means the node may run.
    fn validate_before_run(&self, _task: &NodeTask) -> Vec<String> {
        Vec::new()
    }
}

/// Spawn a node's work as a task the engine can cancel
pub(crate) fn spawn_task(executor: Arc<dyn TaskExecutor>, task: NodeTask) -> RunningTask {
    let cancel = task.cancel.clone();
    let handle = tokio::spawn(async move { executor.execute_task(task).await });
    RunningTask::new(handle, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    #[async_trait]
    impl TaskExecutor for Doubler {
        async fn execute_task(&self, task: NodeTask) -> Result<NodeOutputs, TaskError> {
            let value = task
                .require_input("value")?
                .as_i64()
                .ok_or_else(|| TaskError::InvalidInputType {
                    parameter: "value".to_string(),
                    expected: "integer".to_string(),
                })?;
            let mut outputs = NodeOutputs::new();
            outputs.insert("value".to_string(), serde_json::json!(value * 2));
            Ok(outputs)
        }
    }

    #[tokio::test]
    async fn test_spawned_task_returns_outputs() {
        let mut inputs = NodeOutputs::new();
        inputs.insert("value".to_string(), serde_json::json!(21));
        let task = NodeTask::new("double", "doubler").with_inputs(inputs);

        let mut running = spawn_task(Arc::new(Doubler), task);
        let outputs = running.handle_mut().await.unwrap().unwrap();
        assert_eq!(outputs["value"], 42);
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let task = NodeTask::new("double", "doubler");
        let err = Doubler.execute_task(task).await.unwrap_err();
        assert!(matches!(err, TaskError::MissingInput(name) if name == "value"));
    }

    #[test]
    fn test_default_validation_is_empty() {
        assert!(Doubler
            .validate_before_run(&NodeTask::new("double", "doubler"))
            .is_empty());
    }
}
