//! Node groups - nested subgraphs with their own execution policy
//!
//! A group owns a set of child nodes (which may themselves be groups) and
//! decides how they are scheduled:
//! - `ExecutionEnvironment::Local` lets the engine schedule every child on its own
//! - any other environment makes the group an atomic unit; the engine never
//!   focuses a child and runs the group through its executor instead
//!
//! Exposed port mappings tie group-level parameters to child parameters so an
//! atomic group can be handed its inputs and report its outputs.
//!
//! # Example
//!
//! ```ignore
//! let spec = GroupSpec::new(ExecutionEnvironment::isolated("gpu-worker"))
//!     .with_children(vec!["load".into(), "denoise".into()])
//!     .expose_input("image", "load", "path")
//!     .expose_output("result", "denoise", "image");
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Connection, NodeId, ParameterName};

/// Where a group's children run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    /// Children are resolved individually by the engine
    #[default]
    Local,
    /// The group is handed to the named environment as one unit
    Isolated(String),
}

impl ExecutionEnvironment {
    pub fn isolated(name: impl Into<String>) -> Self {
        Self::Isolated(name.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl std::fmt::Display for ExecutionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Isolated(name) => f.write_str(name),
        }
    }
}

/// Group-specific data carried by a group node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    /// Direct children of this group
    pub children: Vec<NodeId>,
    /// Scheduling policy for the children
    pub execution_environment: ExecutionEnvironment,
    /// Group parameters that feed child inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_inputs: Vec<PortMapping>,
    /// Group parameters that mirror child outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_outputs: Vec<PortMapping>,
}

impl GroupSpec {
    /// Create an empty group spec
    pub fn new(execution_environment: ExecutionEnvironment) -> Self {
        Self {
            execution_environment,
            ..Self::default()
        }
    }

    /// Set the children for this group
    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        self.children = children;
        self
    }

    /// Expose a child input as a group parameter
    pub fn expose_input(
        mut self,
        group_parameter: impl Into<String>,
        internal_node: impl Into<String>,
        internal_parameter: impl Into<String>,
    ) -> Self {
        self.exposed_inputs.push(PortMapping::new(
            internal_node,
            internal_parameter,
            group_parameter,
        ));
        self
    }

    /// Expose a child output as a group parameter
    pub fn expose_output(
        mut self,
        group_parameter: impl Into<String>,
        internal_node: impl Into<String>,
        internal_parameter: impl Into<String>,
    ) -> Self {
        self.exposed_outputs.push(PortMapping::new(
            internal_node,
            internal_parameter,
            group_parameter,
        ));
        self
    }

    /// Whether the engine may schedule children individually
    pub fn is_local(&self) -> bool {
        self.execution_environment.is_local()
    }

    /// Check if this group directly contains a node
    pub fn contains_child(&self, node: &str) -> bool {
        self.children.iter().any(|c| c == node)
    }

    /// Find the exposed input fed into a child parameter
    pub fn exposed_input_for(&self, node: &str, parameter: &str) -> Option<&PortMapping> {
        self.exposed_inputs
            .iter()
            .find(|m| m.internal_node == node && m.internal_parameter == parameter)
    }
}

/// Mapping from a group-level parameter to a child parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// The child node that owns the real parameter
    pub internal_node: NodeId,
    /// The parameter on the child
    pub internal_parameter: ParameterName,
    /// The parameter as it appears on the group node
    pub group_parameter: ParameterName,
}

impl PortMapping {
    pub fn new(
        internal_node: impl Into<String>,
        internal_parameter: impl Into<String>,
        group_parameter: impl Into<String>,
    ) -> Self {
        Self {
            internal_node: internal_node.into(),
            internal_parameter: internal_parameter.into(),
            group_parameter: group_parameter.into(),
        }
    }
}

/// Connections that cross a group boundary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalConnections {
    /// Source outside, target inside
    pub incoming: Vec<Connection>,
    /// Source inside, target outside
    pub outgoing: Vec<Connection>,
}

impl ExternalConnections {
    /// Split connections by how they cross the boundary of `members`
    ///
    /// `members` must hold the group itself and every descendant, so that
    /// connections wired to the group node directly count as internal only
    /// when both ends are inside.
    pub fn classify<'a>(
        members: &HashSet<&str>,
        connections: impl IntoIterator<Item = &'a Connection>,
    ) -> Self {
        let mut external = Self::default();
        for conn in connections {
            let source_inside = members.contains(conn.source_node.as_str());
            let target_inside = members.contains(conn.target_node.as_str());
            match (source_inside, target_inside) {
                (false, true) => external.incoming.push(conn.clone()),
                (true, false) => external.outgoing.push(conn.clone()),
                _ => {}
            }
        }
        external
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: u64, source: &str, target: &str) -> Connection {
        Connection {
            id,
            source_node: source.to_string(),
            source_parameter: "output".to_string(),
            target_node: target.to_string(),
            target_parameter: "input".to_string(),
        }
    }

    #[test]
    fn test_local_is_default() {
        let spec = GroupSpec::default();
        assert!(spec.is_local());
        assert!(!GroupSpec::new(ExecutionEnvironment::isolated("remote")).is_local());
    }

    #[test]
    fn test_expose_ports() {
        let spec = GroupSpec::new(ExecutionEnvironment::isolated("worker"))
            .with_children(vec!["load".to_string(), "save".to_string()])
            .expose_input("path", "load", "path")
            .expose_output("written", "save", "path");

        assert!(spec.contains_child("load"));
        assert!(!spec.contains_child("other"));
        assert_eq!(spec.exposed_input_for("load", "path").unwrap().group_parameter, "path");
        assert!(spec.exposed_input_for("save", "path").is_none());
        assert_eq!(spec.exposed_outputs.len(), 1);
    }

    #[test]
    fn test_classify_boundary() {
        let members: HashSet<&str> = ["group", "b", "c"].into_iter().collect();
        let connections = vec![
            conn(1, "a", "b"), // incoming
            conn(2, "b", "c"), // internal
            conn(3, "c", "d"), // outgoing
            conn(4, "a", "d"), // unrelated
        ];

        let external = ExternalConnections::classify(&members, &connections);
        assert_eq!(external.incoming.len(), 1);
        assert_eq!(external.incoming[0].id, 1);
        assert_eq!(external.outgoing.len(), 1);
        assert_eq!(external.outgoing[0].id, 3);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(ExecutionEnvironment::Local.to_string(), "local");
        assert_eq!(ExecutionEnvironment::isolated("gpu").to_string(), "gpu");
    }
}
