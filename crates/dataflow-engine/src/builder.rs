//! Fluent builder for dataflow graphs
//!
//! Provides a chainable API for constructing a [`FlowGraph`]
//! programmatically. The first wiring error is kept and returned from
//! [`FlowGraphBuilder::build`]; later calls become no-ops.

use crate::error::ConnectionError;
use crate::graph::FlowGraph;
use crate::groups::GroupSpec;
use crate::node::Node;

/// Fluent builder for constructing flow graphs
///
/// # Example
///
/// ```ignore
/// let graph = FlowGraphBuilder::new("flow-1", "Caption")
///     .add_node(
///         Node::new("load", "load-image")
///             .with_parameter(Parameter::output("image", ParameterType::Image)),
///     )
///     .add_node(
///         Node::new("caption", "caption")
///             .with_parameter(Parameter::input("image", ParameterType::Image)),
///     )
///     .with_value("detail", serde_json::json!("high"))
///     .connect("load", "image", "caption", "image")
///     .build()?;
/// ```
pub struct FlowGraphBuilder {
    graph: FlowGraph,
    last_node: Option<String>,
    error: Option<ConnectionError>,
}

impl FlowGraphBuilder {
    /// Create a new graph builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            graph: FlowGraph::new(id, name),
            last_node: None,
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), ConnectionError>) {
        if let Err(e) = result {
            log::debug!("Graph builder error: {}", e);
            self.error.get_or_insert(e);
        }
    }

    /// Add a node to the graph
    pub fn add_node(mut self, node: Node) -> Self {
        if self.error.is_none() {
            let name = node.name().to_string();
            let result = self.graph.add_node(node);
            if result.is_ok() {
                self.last_node = Some(name);
            }
            self.record(result);
        }
        self
    }

    /// Add a group owning already-added children
    pub fn add_group(
        self,
        name: impl Into<String>,
        node_type: impl Into<String>,
        spec: GroupSpec,
    ) -> Self {
        self.add_node(Node::group(name, node_type, spec))
    }

    /// Set a parameter value on the most recently added node
    ///
    /// Must be called after `add_node`.
    pub fn with_value(mut self, parameter: &str, value: serde_json::Value) -> Self {
        if self.error.is_some() {
            return self;
        }
        let result = match self
            .last_node
            .as_deref()
            .and_then(|name| self.graph.node_mut(name))
        {
            Some(node) => node.set_parameter_value(parameter, value),
            None => Err(ConnectionError::UnknownNode(String::new())),
        };
        self.record(result);
        self
    }

    /// Lock the most recently added node
    pub fn locked(mut self) -> Self {
        if let Some(node) = self
            .last_node
            .as_deref()
            .and_then(|name| self.graph.node_mut(name))
        {
            node.set_lock(true);
        }
        self
    }

    /// Connect an output parameter to an input parameter
    pub fn connect(
        mut self,
        source_node: &str,
        source_parameter: &str,
        target_node: &str,
        target_parameter: &str,
    ) -> Self {
        if self.error.is_none() {
            let result = self
                .graph
                .connect(source_node, source_parameter, target_node, target_parameter)
                .map(|_| ());
            self.record(result);
        }
        self
    }

    /// Build the graph, failing with the first wiring error
    pub fn build(self) -> Result<FlowGraph, ConnectionError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::ExecutionEnvironment;
    use crate::types::{Parameter, ParameterType};
    use tokio_test::{assert_err, assert_ok};

    fn text(name: &str) -> Node {
        Node::new(name, "text").with_parameters([
            Parameter::input("text", ParameterType::String),
            Parameter::output("text_out", ParameterType::String),
        ])
    }

    #[test]
    fn test_builder_basic() {
        let graph = assert_ok!(FlowGraphBuilder::new("flow-1", "Test Flow")
            .add_node(text("input-1"))
            .with_value("text", serde_json::json!("Hello"))
            .add_node(text("output-1"))
            .connect("input-1", "text_out", "output-1", "text")
            .build());

        assert_eq!(graph.id, "flow-1");
        assert_eq!(graph.name, "Test Flow");
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.connections().len(), 1);
        assert_eq!(
            graph.node("input-1").unwrap().get_parameter_value("text"),
            Some(&serde_json::json!("Hello"))
        );
    }

    #[test]
    fn test_builder_groups_and_locks() {
        let graph = assert_ok!(FlowGraphBuilder::new("flow-2", "Grouped")
            .add_node(text("a"))
            .locked()
            .add_node(text("b"))
            .add_group(
                "grp",
                "group",
                GroupSpec::new(ExecutionEnvironment::isolated("remote"))
                    .with_children(vec!["a".to_string(), "b".to_string()]),
            )
            .connect("a", "text_out", "b", "text")
            .build());

        assert!(graph.node("a").unwrap().is_locked());
        assert_eq!(graph.effective_node("b"), "grp");
    }

    #[test]
    fn test_builder_keeps_first_error() {
        let err = assert_err!(FlowGraphBuilder::new("flow-3", "Broken")
            .add_node(text("a"))
            .connect("a", "text_out", "missing", "text")
            .add_node(text("a"))
            .build());
        assert_eq!(err, ConnectionError::UnknownNode("missing".to_string()));
    }

    #[test]
    fn test_with_value_unknown_parameter() {
        let err = assert_err!(FlowGraphBuilder::new("flow-4", "Bad value")
            .add_node(text("a"))
            .with_value("nope", serde_json::json!(1))
            .build());
        assert!(matches!(err, ConnectionError::UnknownParameter { .. }));
    }
}
