//! Connection index
//!
//! Keeps connections addressable from both ends: the single upstream
//! connection of an input parameter is found in O(1), the downstream
//! connections of an output parameter in O(degree).

use std::collections::HashMap;

use crate::error::ConnectionError;
use crate::types::{Connection, ConnectionId, NodeId, ParameterName};

/// Per-node, per-parameter lookup table
type ParameterTable<T> = HashMap<NodeId, HashMap<ParameterName, T>>;

/// Bidirectional index over a graph's connections
#[derive(Debug, Clone, Default)]
pub struct ConnectionIndex {
    connections: HashMap<ConnectionId, Connection>,
    incoming: ParameterTable<ConnectionId>,
    outgoing: ParameterTable<Vec<ConnectionId>>,
    next_id: ConnectionId,
}

impl ConnectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection
    ///
    /// Fails if the target parameter already has an incoming connection.
    /// Endpoint existence is checked by the graph before calling this.
    pub fn insert(
        &mut self,
        source_node: &str,
        source_parameter: &str,
        target_node: &str,
        target_parameter: &str,
    ) -> Result<ConnectionId, ConnectionError> {
        if self.upstream(target_node, target_parameter).is_some() {
            return Err(ConnectionError::AlreadyConnected {
                node: target_node.to_string(),
                parameter: target_parameter.to_string(),
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        let connection = Connection {
            id,
            source_node: source_node.to_string(),
            source_parameter: source_parameter.to_string(),
            target_node: target_node.to_string(),
            target_parameter: target_parameter.to_string(),
        };

        self.incoming
            .entry(connection.target_node.clone())
            .or_default()
            .insert(connection.target_parameter.clone(), id);
        self.outgoing
            .entry(connection.source_node.clone())
            .or_default()
            .entry(connection.source_parameter.clone())
            .or_default()
            .push(id);
        self.connections.insert(id, connection);

        Ok(id)
    }

    /// Remove a connection by ID
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;

        if let Some(params) = self.incoming.get_mut(&connection.target_node) {
            params.remove(&connection.target_parameter);
            if params.is_empty() {
                self.incoming.remove(&connection.target_node);
            }
        }
        if let Some(params) = self.outgoing.get_mut(&connection.source_node) {
            if let Some(ids) = params.get_mut(&connection.source_parameter) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    params.remove(&connection.source_parameter);
                }
            }
            if params.is_empty() {
                self.outgoing.remove(&connection.source_node);
            }
        }

        Some(connection)
    }

    /// Remove every connection touching a node
    pub fn remove_node(&mut self, node: &str) -> Vec<Connection> {
        let ids: Vec<ConnectionId> = self
            .incoming_to(node)
            .chain(self.outgoing_from(node))
            .map(|c| c.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// The connection feeding an input parameter
    pub fn upstream(&self, node: &str, parameter: &str) -> Option<&Connection> {
        self.incoming
            .get(node)
            .and_then(|params| params.get(parameter))
            .and_then(|id| self.connections.get(id))
    }

    /// Connections fed by an output parameter
    pub fn downstream<'a>(
        &'a self,
        node: &str,
        parameter: &str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.outgoing
            .get(node)
            .and_then(|params| params.get(parameter))
            .into_iter()
            .flatten()
            .filter_map(move |id| self.connections.get(id))
    }

    /// Every connection whose target is `node`
    pub fn incoming_to<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.incoming
            .get(node)
            .into_iter()
            .flat_map(|params| params.values())
            .filter_map(move |id| self.connections.get(id))
    }

    /// Every connection whose source is `node`
    pub fn outgoing_from<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.outgoing
            .get(node)
            .into_iter()
            .flat_map(|params| params.values())
            .flatten()
            .filter_map(move |id| self.connections.get(id))
    }

    /// All connections, ordered by ID
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        let mut all: Vec<&Connection> = self.connections.values().collect();
        all.sort_by_key(|c| c.id);
        all.into_iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_and_downstream() {
        let mut index = ConnectionIndex::new();
        let id = index.insert("a", "out", "b", "in").unwrap();
        index.insert("a", "out", "c", "in").unwrap();

        let up = index.upstream("b", "in").unwrap();
        assert_eq!(up.id, id);
        assert_eq!(up.source_node, "a");
        assert!(index.upstream("a", "out").is_none());

        let mut targets: Vec<&str> = index
            .downstream("a", "out")
            .map(|c| c.target_node.as_str())
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["b", "c"]);
    }

    #[test]
    fn test_single_incoming_connection() {
        let mut index = ConnectionIndex::new();
        index.insert("a", "out", "b", "in").unwrap();
        let err = index.insert("c", "out", "b", "in").unwrap_err();
        assert_eq!(
            err,
            ConnectionError::AlreadyConnected {
                node: "b".to_string(),
                parameter: "in".to_string()
            }
        );
    }

    #[test]
    fn test_remove_connection() {
        let mut index = ConnectionIndex::new();
        let id = index.insert("a", "out", "b", "in").unwrap();
        let removed = index.remove(id).unwrap();
        assert_eq!(removed.target_node, "b");
        assert!(index.upstream("b", "in").is_none());
        assert_eq!(index.downstream("a", "out").count(), 0);
        assert!(index.is_empty());

        // The parameter can be reconnected afterwards
        index.insert("c", "out", "b", "in").unwrap();
    }

    #[test]
    fn test_remove_node() {
        let mut index = ConnectionIndex::new();
        index.insert("a", "out", "b", "in").unwrap();
        index.insert("b", "out", "c", "in").unwrap();
        index.insert("a", "out", "c", "other").unwrap();

        let removed = index.remove_node("b");
        assert_eq!(removed.len(), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.incoming_to("c").count(), 1);
    }
}
