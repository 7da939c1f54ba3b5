//! Dataflow graph model
//!
//! `FlowGraph` owns every node (groups and their children live in the same
//! arena, linked by name) and a [`ConnectionIndex`] over the edges between
//! them. The resolution machine only ever reaches the graph through the
//! queries defined here.

use std::collections::{HashSet, VecDeque};

use crate::connections::ConnectionIndex;
use crate::error::{ConnectionError, EngineError, Result};
use crate::groups::ExternalConnections;
use crate::node::Node;
use crate::types::{ConnectionId, Direction, NodeId, Parameter, ResolutionState};

/// A graph of nodes connected through their parameters
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// Human-readable name
    pub name: String,
    nodes: std::collections::HashMap<NodeId, Node>,
    /// Insertion order, used wherever iteration order is observable
    order: Vec<NodeId>,
    connections: ConnectionIndex,
}

impl FlowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a node to the graph
    ///
    /// Group nodes take ownership of their children, which must already be
    /// in the graph and must not belong to another group.
    pub fn add_node(&mut self, mut node: Node) -> std::result::Result<(), ConnectionError> {
        if self.nodes.contains_key(node.name()) {
            return Err(ConnectionError::DuplicateNode(node.name().to_string()));
        }

        if let Some(spec) = node.group_spec() {
            for child in &spec.children {
                let existing = self
                    .nodes
                    .get(child)
                    .ok_or_else(|| ConnectionError::UnknownNode(child.clone()))?;
                if let Some(group) = existing.parent_group() {
                    return Err(ConnectionError::AlreadyGrouped {
                        node: child.clone(),
                        group: group.to_string(),
                    });
                }
            }
            for child in spec.children.clone() {
                if let Some(child_node) = self.nodes.get_mut(&child) {
                    child_node.set_parent_group(Some(node.name().to_string()));
                }
            }
        }

        // A parent link only comes from the owning group's children list
        node.set_parent_group(None);
        log::debug!("Added node '{}' ({})", node.name(), node.node_type());
        self.order.push(node.name().to_string());
        self.nodes.insert(node.name().to_string(), node);
        Ok(())
    }

    /// Remove a node, its connections and its group membership
    ///
    /// Children of a removed group become top-level nodes.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let node = self.nodes.remove(name)?;
        self.order.retain(|n| n != name);
        self.connections.remove_node(name);

        if let Some(parent) = node.parent_group() {
            if let Some(spec) = self.nodes.get_mut(parent).and_then(|g| g.group_spec_mut()) {
                spec.children.retain(|c| c != name);
                spec.exposed_inputs.retain(|m| m.internal_node != name);
                spec.exposed_outputs.retain(|m| m.internal_node != name);
            }
        }
        if let Some(spec) = node.group_spec() {
            for child in &spec.children {
                if let Some(child_node) = self.nodes.get_mut(child) {
                    child_node.set_parent_group(None);
                }
            }
        }

        Some(node)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    /// Look up a node, failing with `NodeNotFound`
    pub fn require(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| EngineError::NodeNotFound(name.to_string()))
    }

    /// Mutable variant of [`FlowGraph::require`]
    pub fn require_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| EngineError::NodeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn connections(&self) -> &ConnectionIndex {
        &self.connections
    }

    /// Connect an output parameter to an input parameter
    pub fn connect(
        &mut self,
        source_node: &str,
        source_parameter: &str,
        target_node: &str,
        target_parameter: &str,
    ) -> std::result::Result<ConnectionId, ConnectionError> {
        let source = Self::endpoint(&self.nodes, source_node, source_parameter)?;
        let target = Self::endpoint(&self.nodes, target_node, target_parameter)?;

        if !source.is_output() {
            return Err(ConnectionError::WrongDirection {
                node: source_node.to_string(),
                parameter: source_parameter.to_string(),
                direction: "output",
            });
        }
        if !target.is_input() {
            return Err(ConnectionError::WrongDirection {
                node: target_node.to_string(),
                parameter: target_parameter.to_string(),
                direction: "input",
            });
        }
        if !source.data_type.is_compatible_with(&target.data_type) {
            return Err(ConnectionError::IncompatibleTypes {
                source_type: source.data_type.to_string(),
                target_type: target.data_type.to_string(),
            });
        }

        let id = self
            .connections
            .insert(source_node, source_parameter, target_node, target_parameter)?;
        log::debug!(
            "Connected {}.{} -> {}.{}",
            source_node,
            source_parameter,
            target_node,
            target_parameter
        );
        Ok(id)
    }

    fn endpoint<'a>(
        nodes: &'a std::collections::HashMap<NodeId, Node>,
        node: &str,
        parameter: &str,
    ) -> std::result::Result<&'a Parameter, ConnectionError> {
        nodes
            .get(node)
            .ok_or_else(|| ConnectionError::UnknownNode(node.to_string()))?
            .parameter(parameter)
            .ok_or_else(|| ConnectionError::UnknownParameter {
                node: node.to_string(),
                parameter: parameter.to_string(),
            })
    }

    /// Remove a connection
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Find the node and parameter on the other end of a connection
    ///
    /// Downstream lookups return the earliest-made connection; use
    /// [`FlowGraph::downstream_of`] for all of them.
    ///
    /// # Panics
    ///
    /// Panics if `node` does not exist or does not declare `parameter`.
    pub fn get_connected_node(
        &self,
        node: &str,
        parameter: &str,
        direction: Direction,
    ) -> Option<(&Node, &Parameter)> {
        self.assert_parameter(node, parameter);
        let connection = match direction {
            Direction::Upstream => self.connections.upstream(node, parameter),
            Direction::Downstream => self
                .connections
                .downstream(node, parameter)
                .min_by_key(|c| c.id),
        }?;

        let (other, other_parameter) = match direction {
            Direction::Upstream => (&connection.source_node, &connection.source_parameter),
            Direction::Downstream => (&connection.target_node, &connection.target_parameter),
        };
        let other_node = self.nodes.get(other)?;
        let other_param = other_node.parameter(other_parameter)?;
        Some((other_node, other_param))
    }

    /// Every node and parameter fed by an output parameter
    ///
    /// # Panics
    ///
    /// Panics if `node` does not exist or does not declare `parameter`.
    pub fn downstream_of(&self, node: &str, parameter: &str) -> Vec<(&Node, &Parameter)> {
        self.assert_parameter(node, parameter);
        let mut connections: Vec<_> = self.connections.downstream(node, parameter).collect();
        connections.sort_by_key(|c| c.id);
        connections
            .into_iter()
            .filter_map(|c| {
                let target = self.nodes.get(&c.target_node)?;
                let param = target.parameter(&c.target_parameter)?;
                Some((target, param))
            })
            .collect()
    }

    fn assert_parameter(&self, node: &str, parameter: &str) {
        match self.nodes.get(node) {
            Some(n) => {
                n.expect_parameter(parameter);
            }
            None => panic!("graph '{}' has no node '{}'", self.id, node),
        }
    }

    /// Set a parameter value from outside the engine
    ///
    /// This is the one path every value change goes through, whether it
    /// comes from a user edit or from upstream propagation.
    pub fn set_parameter_value(
        &mut self,
        node: &str,
        parameter: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let target = self.require_mut(node)?;
        target.set_parameter_value(parameter, value)?;
        log::debug!("Set {}.{}", node, parameter);
        Ok(())
    }

    /// Lock or unlock a node
    pub fn set_lock(&mut self, node: &str, lock: bool) -> Result<()> {
        self.require_mut(node)?.set_lock(lock);
        Ok(())
    }

    /// The group that owns a node, if any
    pub fn parent_group(&self, node: &str) -> Option<&Node> {
        self.nodes
            .get(node)
            .and_then(|n| n.parent_group())
            .and_then(|g| self.nodes.get(g))
    }

    /// The node the engine must schedule in place of `node`
    ///
    /// Climbs the group chain and returns the outermost ancestor whose
    /// execution environment is not local, or `node` itself when every
    /// ancestor is local. Terminates because ownership forms a tree.
    pub fn effective_node(&self, node: &str) -> NodeId {
        let mut effective = node.to_string();
        let mut current = node;
        let mut seen = HashSet::new();
        while let Some(group) = self.parent_group(current) {
            if !seen.insert(group.name()) {
                break;
            }
            if group.group_spec().is_some_and(|spec| !spec.is_local()) {
                effective = group.name().to_string();
            }
            current = group.name();
        }
        effective
    }

    /// All nodes nested under a group, depth-first
    pub fn descendants(&self, group: &str) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = self.children_reversed(group);
        while let Some(current) = stack.pop() {
            if current == group || !seen.insert(current) {
                continue;
            }
            result.push(current.to_string());
            stack.extend(self.children_reversed(current));
        }
        result
    }

    fn children_reversed(&self, name: &str) -> Vec<&str> {
        self.nodes
            .get(name)
            .and_then(|n| n.group_spec())
            .map(|spec| spec.children.iter().rev().map(|c| c.as_str()).collect())
            .unwrap_or_default()
    }

    /// Connections crossing the boundary of a group
    pub fn external_connections(&self, group: &str) -> ExternalConnections {
        let descendants = self.descendants(group);
        let mut members: HashSet<&str> = descendants.iter().map(|d| d.as_str()).collect();
        members.insert(group);

        let touching = members.iter().flat_map(|m| {
            self.connections
                .incoming_to(m)
                .chain(self.connections.outgoing_from(m))
        });
        let mut seen = HashSet::new();
        let unique: Vec<_> = touching.filter(|c| seen.insert(c.id)).collect();
        let mut external = ExternalConnections::classify(&members, unique);
        external.incoming.sort_by_key(|c| c.id);
        external.outgoing.sort_by_key(|c| c.id);
        external
    }

    /// Mark everything downstream of `node` as unresolved
    ///
    /// Nodes that are currently resolving keep their state (they are on
    /// the focus stack and will execute anyway) but are still traversed.
    /// Returns the nodes whose state changed.
    pub fn invalidate_downstream(&mut self, node: &str) -> Vec<NodeId> {
        let mut invalidated = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        queue.push_back(node.to_string());
        visited.insert(node.to_string());

        while let Some(current) = queue.pop_front() {
            let mut sources = vec![current.clone()];
            sources.extend(self.descendants(&current));

            let mut targets: Vec<(ConnectionId, NodeId)> = sources
                .iter()
                .flat_map(|s| self.connections.outgoing_from(s))
                .map(|c| (c.id, c.target_node.clone()))
                .collect();
            targets.sort();

            for (_, target) in targets {
                let effective = self.effective_node(&target);
                for name in [target, effective] {
                    if !visited.insert(name.clone()) {
                        continue;
                    }
                    if let Some(n) = self.nodes.get_mut(&name) {
                        if n.state() == ResolutionState::Resolved {
                            n.set_state(ResolutionState::Unresolved);
                            invalidated.push(name.clone());
                        }
                    }
                    queue.push_back(name);
                }
            }
        }

        if !invalidated.is_empty() {
            log::debug!("Invalidated downstream of '{}': {:?}", node, invalidated);
        }
        invalidated
    }

    /// Snapshot of every node's resolution state, in insertion order
    pub fn states(&self) -> Vec<(NodeId, ResolutionState)> {
        self.nodes()
            .map(|n| (n.name().to_string(), n.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{ExecutionEnvironment, GroupSpec};
    use crate::types::ParameterType;

    fn passthrough(name: &str) -> Node {
        Node::new(name, "passthrough").with_parameters([
            Parameter::input("in", ParameterType::Any),
            Parameter::output("out", ParameterType::Any),
        ])
    }

    fn linear() -> FlowGraph {
        let mut graph = FlowGraph::new("g", "Linear");
        for name in ["a", "b", "c"] {
            graph.add_node(passthrough(name)).unwrap();
        }
        graph.connect("a", "out", "b", "in").unwrap();
        graph.connect("b", "out", "c", "in").unwrap();
        graph
    }

    #[test]
    fn test_get_connected_node() {
        let graph = linear();
        let (node, param) = graph.get_connected_node("b", "in", Direction::Upstream).unwrap();
        assert_eq!(node.name(), "a");
        assert_eq!(param.name, "out");

        let (node, param) = graph.get_connected_node("b", "out", Direction::Downstream).unwrap();
        assert_eq!(node.name(), "c");
        assert_eq!(param.name, "in");

        assert!(graph.get_connected_node("a", "in", Direction::Upstream).is_none());
    }

    #[test]
    #[should_panic(expected = "has no parameter 'nope'")]
    fn test_get_connected_node_unknown_parameter_panics() {
        let graph = linear();
        graph.get_connected_node("b", "nope", Direction::Upstream);
    }

    #[test]
    fn test_connect_rejects_bad_edges() {
        let mut graph = linear();
        graph
            .add_node(
                Node::new("img", "image")
                    .with_parameter(Parameter::output("image", ParameterType::Image)),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("txt", "text")
                    .with_parameter(Parameter::input("text", ParameterType::String)),
            )
            .unwrap();

        assert!(matches!(
            graph.connect("img", "image", "txt", "text"),
            Err(ConnectionError::IncompatibleTypes { .. })
        ));
        assert!(matches!(
            graph.connect("a", "in", "c", "in"),
            Err(ConnectionError::WrongDirection { direction: "output", .. })
        ));
        assert!(matches!(
            graph.connect("a", "out", "c", "in"),
            Err(ConnectionError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            graph.connect("zzz", "out", "c", "in"),
            Err(ConnectionError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = linear();
        assert_eq!(
            graph.add_node(passthrough("a")),
            Err(ConnectionError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_invalidate_downstream() {
        let mut graph = linear();
        for name in ["a", "b", "c"] {
            graph.node_mut(name).unwrap().set_state(ResolutionState::Resolved);
        }
        graph.node_mut("b").unwrap().set_state(ResolutionState::Resolving);

        let invalidated = graph.invalidate_downstream("a");
        assert_eq!(invalidated, vec!["c".to_string()]);
        assert_eq!(graph.node("a").unwrap().state(), ResolutionState::Resolved);
        assert_eq!(graph.node("b").unwrap().state(), ResolutionState::Resolving);
        assert_eq!(graph.node("c").unwrap().state(), ResolutionState::Unresolved);
    }

    #[test]
    fn test_group_ownership_and_effective_node() {
        let mut graph = FlowGraph::new("g", "Groups");
        graph.add_node(passthrough("x")).unwrap();
        graph.add_node(passthrough("y")).unwrap();
        graph
            .add_node(Node::group(
                "inner",
                "group",
                GroupSpec::default().with_children(vec!["x".to_string()]),
            ))
            .unwrap();
        graph
            .add_node(Node::group(
                "outer",
                "group",
                GroupSpec::new(ExecutionEnvironment::isolated("remote"))
                    .with_children(vec!["inner".to_string(), "y".to_string()]),
            ))
            .unwrap();

        assert_eq!(graph.parent_group("x").unwrap().name(), "inner");
        assert_eq!(graph.effective_node("x"), "outer");
        assert_eq!(graph.effective_node("y"), "outer");
        assert_eq!(graph.effective_node("outer"), "outer");
        assert_eq!(graph.descendants("outer"), vec!["inner", "x", "y"]);

        let err = graph
            .add_node(Node::group(
                "again",
                "group",
                GroupSpec::default().with_children(vec!["x".to_string()]),
            ))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::AlreadyGrouped { .. }));
    }

    #[test]
    fn test_local_group_does_not_redirect() {
        let mut graph = FlowGraph::new("g", "Local");
        graph.add_node(passthrough("x")).unwrap();
        graph
            .add_node(Node::group(
                "local",
                "group",
                GroupSpec::default().with_children(vec!["x".to_string()]),
            ))
            .unwrap();
        assert_eq!(graph.effective_node("x"), "x");
    }

    #[test]
    fn test_external_connections() {
        let mut graph = FlowGraph::new("g", "External");
        for name in ["src", "x", "y", "sink"] {
            graph.add_node(passthrough(name)).unwrap();
        }
        graph
            .add_node(Node::group(
                "grp",
                "group",
                GroupSpec::new(ExecutionEnvironment::isolated("remote"))
                    .with_children(vec!["x".to_string(), "y".to_string()]),
            ))
            .unwrap();
        graph.connect("src", "out", "x", "in").unwrap();
        graph.connect("x", "out", "y", "in").unwrap();
        graph.connect("y", "out", "sink", "in").unwrap();

        let external = graph.external_connections("grp");
        assert_eq!(external.incoming.len(), 1);
        assert_eq!(external.incoming[0].source_node, "src");
        assert_eq!(external.outgoing.len(), 1);
        assert_eq!(external.outgoing[0].target_node, "sink");
    }

    #[test]
    fn test_remove_node_detaches() {
        let mut graph = linear();
        graph.remove_node("b").unwrap();
        assert_eq!(graph.connections().len(), 0);
        assert_eq!(graph.len(), 2);
        assert!(graph.node("b").is_none());
    }
}
