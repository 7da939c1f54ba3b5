//! Per-run resolution state

use crate::focus::{Focus, FocusStack};
use crate::graph::FlowGraph;
use crate::types::ResolutionState;

/// State owned by one resolution request: the focus stack and the
/// step-mode flag
#[derive(Debug)]
pub struct ResolutionContext {
    pub focus_stack: FocusStack,
    pub paused: bool,
}

impl ResolutionContext {
    pub fn new(max_depth: usize, paused: bool) -> Self {
        Self {
            focus_stack: FocusStack::new(max_depth),
            paused,
        }
    }

    /// The node currently in focus
    pub fn current_focus(&self) -> Option<&Focus> {
        self.focus_stack.peek().ok()
    }

    /// Roll every focused node back to unresolved and empty the stack
    pub fn abort(&mut self, graph: &mut FlowGraph) {
        for name in self.focus_stack.nodes() {
            if let Some(node) = graph.node_mut(name) {
                if node.state() == ResolutionState::Resolving {
                    node.set_state(ResolutionState::Unresolved);
                }
            }
        }
        self.reset(graph);
    }

    /// Empty the stack, clearing the top node's scratch state
    pub fn reset(&mut self, graph: &mut FlowGraph) {
        self.focus_stack.reset(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_abort_rolls_back_resolving_nodes() {
        let mut graph = FlowGraph::new("g", "Abort");
        for name in ["a", "b", "c"] {
            graph.add_node(Node::new(name, "t")).unwrap();
        }
        graph.node_mut("a").unwrap().set_state(ResolutionState::Resolving);
        graph.node_mut("b").unwrap().set_state(ResolutionState::Resolving);
        graph.node_mut("c").unwrap().set_state(ResolutionState::Resolved);

        let mut context = ResolutionContext::new(16, false);
        context.focus_stack.push("a").unwrap();
        context.focus_stack.push("b").unwrap();
        context.abort(&mut graph);

        assert!(context.current_focus().is_none());
        assert_eq!(graph.node("a").unwrap().state(), ResolutionState::Unresolved);
        assert_eq!(graph.node("b").unwrap().state(), ResolutionState::Unresolved);
        assert_eq!(graph.node("c").unwrap().state(), ResolutionState::Resolved);
    }
}
