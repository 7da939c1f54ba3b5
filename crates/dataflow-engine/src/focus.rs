//! Focus stack
//!
//! An explicit stack of [`Focus`] records stands in for a recursive
//! dependency walk, so a run can be suspended between any two steps and
//! cancelled without unwinding native frames.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result, TaskError};
use crate::graph::FlowGraph;
use crate::types::{NodeId, NodeOutputs};

/// A node's unit of work, spawned and owned by its focus
///
/// Dropping it aborts the task.
#[derive(Debug)]
pub struct RunningTask {
    handle: JoinHandle<std::result::Result<NodeOutputs, TaskError>>,
    cancel: CancellationToken,
}

impl RunningTask {
    pub(crate) fn new(
        handle: JoinHandle<std::result::Result<NodeOutputs, TaskError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { handle, cancel }
    }

    /// Ask the task to stop and abort it at its next await point
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) fn handle_mut(
        &mut self,
    ) -> &mut JoinHandle<std::result::Result<NodeOutputs, TaskError>> {
        &mut self.handle
    }

    /// Cancel and wait until the task has fully unwound
    pub async fn cancel_and_join(mut self) {
        self.cancel();
        // The join result is irrelevant once cancelled
        let _ = (&mut self.handle).await;
    }
}

impl Drop for RunningTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// "We are currently resolving this node"
#[derive(Debug)]
pub struct Focus {
    pub node: NodeId,
    pub task: Option<RunningTask>,
}

impl Focus {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            task: None,
        }
    }
}

/// Stack of focuses, top is the node being worked on
#[derive(Debug)]
pub struct FocusStack {
    stack: Vec<Focus>,
    max_depth: usize,
}

impl FocusStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_depth,
        }
    }

    /// Focus a node
    pub fn push(&mut self, node: impl Into<String>) -> Result<()> {
        if self.stack.len() >= self.max_depth {
            return Err(EngineError::FocusDepthExceeded {
                limit: self.max_depth,
            });
        }
        let node = node.into();
        log::debug!("Focus pushed '{}' (depth {})", node, self.stack.len() + 1);
        self.stack.push(Focus::new(node));
        Ok(())
    }

    /// Replace the top focus with another node (group redirection)
    pub fn replace_top(&mut self, node: impl Into<String>) -> Result<()> {
        let top = self.stack.last_mut().ok_or(EngineError::EmptyFocusStack)?;
        top.node = node.into();
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Focus> {
        let focus = self.stack.pop();
        if let Some(f) = &focus {
            log::debug!("Focus popped '{}'", f.node);
        }
        focus
    }

    pub fn peek(&self) -> Result<&Focus> {
        self.stack.last().ok_or(EngineError::EmptyFocusStack)
    }

    pub fn peek_mut(&mut self) -> Result<&mut Focus> {
        self.stack.last_mut().ok_or(EngineError::EmptyFocusStack)
    }

    /// Whether a node is anywhere on the stack
    pub fn contains(&self, node: &str) -> bool {
        self.stack.iter().any(|f| f.node == node)
    }

    /// Focused nodes, bottom first
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().map(|f| f.node.as_str())
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Pop everything
    ///
    /// The top node is told to drop its in-progress scratch state. Any task
    /// still attached is dropped without being cancelled; cancel first if
    /// one may be outstanding.
    pub fn reset(&mut self, graph: &mut FlowGraph) {
        if let Some(top) = self.stack.last() {
            if let Some(node) = graph.node_mut(&top.node) {
                node.clear_run_state();
            }
        }
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::types::{Parameter, ParameterType};

    #[test]
    fn test_push_peek_pop() {
        let mut stack = FocusStack::new(8);
        assert!(matches!(stack.peek(), Err(EngineError::EmptyFocusStack)));

        stack.push("a").unwrap();
        stack.push("b").unwrap();
        assert_eq!(stack.peek().unwrap().node, "b");
        assert!(stack.contains("a"));
        assert_eq!(stack.nodes().collect::<Vec<_>>(), vec!["a", "b"]);

        assert_eq!(stack.pop().unwrap().node, "b");
        assert_eq!(stack.pop().unwrap().node, "a");
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_depth_ceiling() {
        let mut stack = FocusStack::new(2);
        stack.push("a").unwrap();
        stack.push("b").unwrap();
        assert!(matches!(
            stack.push("c"),
            Err(EngineError::FocusDepthExceeded { limit: 2 })
        ));
    }

    #[test]
    fn test_replace_top() {
        let mut stack = FocusStack::new(4);
        stack.push("child").unwrap();
        stack.replace_top("group").unwrap();
        assert_eq!(stack.peek().unwrap().node, "group");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_reset_clears_top_scratch_state() {
        let mut graph = FlowGraph::new("g", "Reset");
        graph
            .add_node(
                Node::new("a", "t").with_parameter(Parameter::input("in", ParameterType::Any)),
            )
            .unwrap();
        let node = graph.node_mut("a").unwrap();
        node.advance_parameter();
        node.request_cancellation();

        let mut stack = FocusStack::new(4);
        stack.push("a").unwrap();
        stack.reset(&mut graph);

        assert!(stack.is_empty());
        let node = graph.node("a").unwrap();
        assert!(node.current_parameter().is_none());
        assert!(!node.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_running_task_cancel_and_join() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = tokio::spawn(async move {
            child.cancelled().await;
            Ok(NodeOutputs::new())
        });
        let task = RunningTask::new(handle, cancel.clone());
        task.cancel_and_join().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_running_task_aborts_it() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
            Ok(NodeOutputs::new())
        });
        drop(RunningTask::new(handle, CancellationToken::new()));
        assert!(rx.await.is_err());
    }
}
