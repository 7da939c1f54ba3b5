//! Graph validation
//!
//! Static checks over a whole graph (connection endpoints, cycles, required
//! inputs, node types) plus the pre-run check every node passes before the
//! resolution machine hands it to an executor.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::executor::{NodeTask, TaskExecutor};
use crate::graph::FlowGraph;
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::types::{ConnectionId, NodeId, ParameterName};

/// A problem found by [`validate_graph`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    /// These nodes sit on, or downstream of, a dependency cycle
    CycleDetected { nodes: Vec<NodeId> },
    /// A connection points at a node that is not in the graph
    DanglingConnection {
        connection: ConnectionId,
        node: NodeId,
    },
    /// A connection points at a parameter its node does not declare
    UnknownParameter {
        connection: ConnectionId,
        node: NodeId,
        parameter: ParameterName,
    },
    /// A required input is neither connected nor given a value
    UnconnectedRequiredInput {
        node: NodeId,
        parameter: ParameterName,
    },
    /// The registry does not know the node's type
    UnknownNodeType { node: NodeId, node_type: String },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { nodes } => {
                write!(f, "Cycle detected involving: {}", nodes.join(", "))
            }
            Self::DanglingConnection { connection, node } => {
                write!(f, "Connection {} references unknown node '{}'", connection, node)
            }
            Self::UnknownParameter {
                connection,
                node,
                parameter,
            } => write!(
                f,
                "Connection {} references unknown parameter '{}' on node '{}'",
                connection, parameter, node
            ),
            Self::UnconnectedRequiredInput { node, parameter } => write!(
                f,
                "Required input '{}' on node '{}' is not connected and has no value",
                parameter, node
            ),
            Self::UnknownNodeType { node, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node)
            }
        }
    }
}

impl std::error::Error for GraphIssue {}

/// Validate a graph before resolving anything in it
///
/// Returns every issue found, not just the first. Pass a registry to also
/// check that each node type is known.
pub fn validate_graph(graph: &FlowGraph, registry: Option<&NodeRegistry>) -> Vec<GraphIssue> {
    let mut issues = Vec::new();

    validate_endpoints(graph, &mut issues);
    detect_cycles(graph, &mut issues);
    validate_required_inputs(graph, &mut issues);
    if let Some(registry) = registry {
        validate_node_types(graph, registry, &mut issues);
    }

    issues
}

/// Problems that keep a node from running right now
///
/// Merges the node's own required-input check with the executor's
/// node-type specific checks.
pub fn validate_node_before_run(
    node: &Node,
    executor: &dyn TaskExecutor,
    task: &NodeTask,
) -> Vec<String> {
    let mut problems = node.validate_before_node_run();
    problems.extend(executor.validate_before_run(task));
    problems
}

fn validate_endpoints(graph: &FlowGraph, issues: &mut Vec<GraphIssue>) {
    for connection in graph.connections().iter() {
        let endpoints = [
            (&connection.source_node, &connection.source_parameter),
            (&connection.target_node, &connection.target_parameter),
        ];
        for (node, parameter) in endpoints {
            match graph.node(node) {
                None => issues.push(GraphIssue::DanglingConnection {
                    connection: connection.id,
                    node: node.clone(),
                }),
                Some(n) if n.parameter(parameter).is_none() => {
                    issues.push(GraphIssue::UnknownParameter {
                        connection: connection.id,
                        node: node.clone(),
                        parameter: parameter.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
}

/// Kahn's algorithm over node-level edges
fn detect_cycles(graph: &FlowGraph, issues: &mut Vec<GraphIssue>) {
    let mut in_degree: HashMap<&str, usize> = graph.nodes().map(|n| (n.name(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for connection in graph.connections().iter() {
        let (source, target) = (
            connection.source_node.as_str(),
            connection.target_node.as_str(),
        );
        if !in_degree.contains_key(source) || !seen.insert((source, target)) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(target) {
            *degree += 1;
            edges.entry(source).or_default().push(target);
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes()
        .map(|n| n.name())
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();

    while let Some(node) = queue.pop_front() {
        for &target in edges.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    let stuck: Vec<NodeId> = graph
        .nodes()
        .map(|n| n.name())
        .filter(|name| in_degree.get(name).is_some_and(|d| *d > 0))
        .map(str::to_string)
        .collect();
    if !stuck.is_empty() {
        issues.push(GraphIssue::CycleDetected { nodes: stuck });
    }
}

fn validate_required_inputs(graph: &FlowGraph, issues: &mut Vec<GraphIssue>) {
    for node in graph.nodes() {
        for parameter in node.parameters() {
            if !parameter.required || !parameter.is_input() || parameter.is_control() {
                continue;
            }
            if graph
                .connections()
                .upstream(node.name(), &parameter.name)
                .is_some()
            {
                continue;
            }
            match node.get_parameter_value(&parameter.name) {
                None | Some(serde_json::Value::Null) => {
                    issues.push(GraphIssue::UnconnectedRequiredInput {
                        node: node.name().to_string(),
                        parameter: parameter.name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
}

fn validate_node_types(graph: &FlowGraph, registry: &NodeRegistry, issues: &mut Vec<GraphIssue>) {
    for node in graph.nodes() {
        if !registry.has_node_type(node.node_type()) {
            issues.push(GraphIssue::UnknownNodeType {
                node: node.name().to_string(),
                node_type: node.node_type().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeTemplate;
    use crate::types::{Parameter, ParameterType};

    fn passthrough(name: &str) -> Node {
        Node::new(name, "passthrough").with_parameters([
            Parameter::input("in", ParameterType::Any),
            Parameter::output("out", ParameterType::Any),
        ])
    }

    #[test]
    fn test_valid_chain_has_no_issues() {
        let mut graph = FlowGraph::new("g", "Chain");
        graph.add_node(passthrough("a")).unwrap();
        graph.add_node(passthrough("b")).unwrap();
        graph.connect("a", "out", "b", "in").unwrap();

        assert!(validate_graph(&graph, None).is_empty());
    }

    #[test]
    fn test_cycle_is_reported_with_its_nodes() {
        let mut graph = FlowGraph::new("g", "Cycle");
        for name in ["a", "b", "c", "d"] {
            graph.add_node(passthrough(name)).unwrap();
        }
        graph.connect("a", "out", "b", "in").unwrap();
        graph.connect("b", "out", "c", "in").unwrap();
        graph.connect("c", "out", "a", "in").unwrap();
        graph.connect("c", "out", "d", "in").unwrap();

        let issues = validate_graph(&graph, None);
        assert_eq!(
            issues,
            vec![GraphIssue::CycleDetected {
                nodes: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            }]
        );
    }

    #[test]
    fn test_required_input_needs_connection_or_value() {
        let mut graph = FlowGraph::new("g", "Required");
        graph
            .add_node(
                Node::new("resize", "image-resize")
                    .with_parameter(Parameter::input("image", ParameterType::Image).required())
                    .with_parameter(Parameter::input("width", ParameterType::Integer).required()),
            )
            .unwrap();
        graph
            .set_parameter_value("resize", "width", serde_json::json!(512))
            .unwrap();

        let issues = validate_graph(&graph, None);
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].to_string(),
            "Required input 'image' on node 'resize' is not connected and has no value"
        );
    }

    #[test]
    fn test_unknown_node_type_with_registry() {
        let mut graph = FlowGraph::new("g", "Types");
        graph.add_node(passthrough("a")).unwrap();
        graph.add_node(Node::new("b", "mystery")).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register_template(NodeTemplate::new("passthrough"));

        let issues = validate_graph(&graph, Some(&registry));
        assert_eq!(
            issues,
            vec![GraphIssue::UnknownNodeType {
                node: "b".into(),
                node_type: "mystery".into(),
            }]
        );
    }

    #[test]
    fn test_node_before_run_merges_executor_problems() {
        struct NeedsModel;

        #[async_trait::async_trait]
        impl TaskExecutor for NeedsModel {
            async fn execute_task(
                &self,
                _task: NodeTask,
            ) -> Result<crate::types::NodeOutputs, crate::error::TaskError> {
                Ok(Default::default())
            }

            fn validate_before_run(&self, task: &NodeTask) -> Vec<String> {
                if task.input("model").is_none() {
                    vec!["no model selected".to_string()]
                } else {
                    Vec::new()
                }
            }
        }

        let node = Node::new("gen", "generate")
            .with_parameter(Parameter::input("prompt", ParameterType::Prompt).required());
        let problems =
            validate_node_before_run(&node, &NeedsModel, &NodeTask::new("gen", "generate"));
        assert_eq!(
            problems,
            vec![
                "Required input 'prompt' has no value".to_string(),
                "no model selected".to_string(),
            ]
        );
    }
}
