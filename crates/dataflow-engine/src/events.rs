//! Event types for observing resolution
//!
//! Events are sent from the engine to whatever is watching it (an editor,
//! a debugger, a log). Delivery is fire-and-forget: the engine never reads
//! anything back, it only preserves the order of events within a run.

use serde::{Deserialize, Serialize};

use crate::types::NodeOutputs;

/// Trait for receiving resolution events
///
/// This abstracts over the transport mechanism (channel, websocket,
/// callback) so the engine can be embedded anywhere.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: ResolutionEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while resolving a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResolutionEvent {
    /// A parameter is being checked for unresolved dependencies
    #[serde(rename_all = "camelCase")]
    Spotlight {
        execution_id: String,
        node: String,
        parameter: String,
    },

    /// A node is about to be prepared for execution
    #[serde(rename_all = "camelCase")]
    CurrentNode { execution_id: String, node: String },

    /// A parameter holds a value going into execution
    #[serde(rename_all = "camelCase")]
    ParameterValueUpdate {
        execution_id: String,
        node: String,
        parameter: String,
        data_type: String,
        value: serde_json::Value,
    },

    /// A node's unit of work started
    #[serde(rename_all = "camelCase")]
    NodeStarted { execution_id: String, node: String },

    /// A node's unit of work ended, whatever the outcome
    #[serde(rename_all = "camelCase")]
    NodeFinished { execution_id: String, node: String },

    /// A node resolved and produced these outputs
    #[serde(rename_all = "camelCase")]
    NodeResolved {
        execution_id: String,
        node: String,
        node_type: String,
        outputs: NodeOutputs,
    },
}

impl ResolutionEvent {
    /// Name of the node the event is about
    pub fn node(&self) -> &str {
        match self {
            Self::Spotlight { node, .. }
            | Self::CurrentNode { node, .. }
            | Self::ParameterValueUpdate { node, .. }
            | Self::NodeStarted { node, .. }
            | Self::NodeFinished { node, .. }
            | Self::NodeResolved { node, .. } => node,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ResolutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<ResolutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ResolutionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ResolutionEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

/// Event sink backed by an unbounded tokio channel
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::UnboundedSender<ResolutionEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<ResolutionEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: ResolutionEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spotlight(node: &str) -> ResolutionEvent {
        ResolutionEvent::Spotlight {
            execution_id: "exec1".to_string(),
            node: node.to_string(),
            parameter: "in".to_string(),
        }
    }

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(spotlight("a")).unwrap();
        sink.send(spotlight("b")).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].node(), "a");
        assert_eq!(events[1].node(), "b");

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(spotlight("a")).unwrap();
    }

    #[test]
    fn test_channel_sink_reports_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelEventSink::new(tx);
        sink.send(spotlight("a")).unwrap();
        drop(rx);
        assert!(sink.send(spotlight("b")).is_err());
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(ResolutionEvent::NodeStarted {
            execution_id: "e".to_string(),
            node: "blur".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "nodeStarted");
        assert_eq!(json["executionId"], "e");
        assert_eq!(json["node"], "blur");
    }
}
