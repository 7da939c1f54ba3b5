//! Core value types for dataflow graphs
//!
//! These types describe the pieces a graph is made of: parameters, the
//! connections between them, and the resolution state each node moves
//! through while the engine works on it.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node (its name, unique within the graph)
pub type NodeId = String;

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Name of a parameter, unique within its node
pub type ParameterName = String;

/// Output values produced by a node, keyed by parameter name
pub type NodeOutputs = std::collections::HashMap<ParameterName, serde_json::Value>;

/// Where a node stands in the current resolution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    /// Outputs are missing or stale
    #[default]
    Unresolved,
    /// The node is on the focus stack
    Resolving,
    /// Outputs are current
    Resolved,
}

/// The data type carried by a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Accepts any type
    Any,
    /// Execution-order edge with no payload
    Control,
    /// Text string
    String,
    /// Prompt text (interchangeable with String)
    Prompt,
    /// Boolean value
    Boolean,
    /// Integer value
    Integer,
    /// Floating point value
    Float,
    /// JSON object
    Json,
    /// Image reference
    Image,
    /// Video reference
    Video,
    /// Audio reference
    Audio,
    /// File path
    Path,
}

impl ParameterType {
    /// Check if a value of this type can flow into a parameter of `other`
    pub fn is_compatible_with(&self, other: &ParameterType) -> bool {
        // Control edges only ever connect to other control edges
        if self.is_control() || other.is_control() {
            return self == other;
        }

        if matches!(self, ParameterType::Any) || matches!(other, ParameterType::Any) {
            return true;
        }

        match (self, other) {
            (ParameterType::Prompt, ParameterType::String)
            | (ParameterType::String, ParameterType::Prompt) => true,
            (ParameterType::Integer, ParameterType::Float) => true,
            _ => self == other,
        }
    }

    /// Whether this is a control pseudo-parameter
    pub fn is_control(&self) -> bool {
        matches!(self, ParameterType::Control)
    }

    /// Type tag reported to event sinks
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Any => "any",
            ParameterType::Control => "control",
            ParameterType::String => "string",
            ParameterType::Prompt => "prompt",
            ParameterType::Boolean => "boolean",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Json => "json",
            ParameterType::Image => "image",
            ParameterType::Video => "video",
            ParameterType::Audio => "audio",
            ParameterType::Path => "path",
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction capabilities of a parameter, each independently toggleable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterModes {
    pub input: bool,
    pub output: bool,
    pub property: bool,
}

impl ParameterModes {
    pub const INPUT: Self = Self {
        input: true,
        output: false,
        property: false,
    };

    pub const OUTPUT: Self = Self {
        input: false,
        output: true,
        property: false,
    };

    pub const PROPERTY: Self = Self {
        input: false,
        output: false,
        property: true,
    };

    /// Input that can also be edited as a property
    pub const INPUT_PROPERTY: Self = Self {
        input: true,
        output: false,
        property: true,
    };
}

impl Default for ParameterModes {
    fn default() -> Self {
        Self::INPUT_PROPERTY
    }
}

/// Which side of a connection to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow the connection feeding this parameter
    Upstream,
    /// Follow the connections this parameter feeds
    Downstream,
}

/// A parameter declared on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Name, unique within the node
    pub name: ParameterName,
    /// Data type tag
    pub data_type: ParameterType,
    /// Direction capabilities
    pub modes: ParameterModes,
    /// Whether the node refuses to run without a value here
    pub required: bool,
    /// Value used when nothing has been set or connected
    pub default_value: Option<serde_json::Value>,
}

impl Parameter {
    /// Create an input parameter
    pub fn input(name: impl Into<String>, data_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            data_type,
            modes: ParameterModes::INPUT_PROPERTY,
            required: false,
            default_value: None,
        }
    }

    /// Create an output parameter
    pub fn output(name: impl Into<String>, data_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            data_type,
            modes: ParameterModes::OUTPUT,
            required: false,
            default_value: None,
        }
    }

    /// Create a property-only parameter
    pub fn property(name: impl Into<String>, data_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            data_type,
            modes: ParameterModes::PROPERTY,
            required: false,
            default_value: None,
        }
    }

    /// Create a control input (execution-order edge)
    pub fn control_in(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: ParameterType::Control,
            modes: ParameterModes::INPUT,
            required: false,
            default_value: None,
        }
    }

    /// Create a control output (execution-order edge)
    pub fn control_out(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: ParameterType::Control,
            modes: ParameterModes::OUTPUT,
            required: false,
            default_value: None,
        }
    }

    /// Mark this parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Override the direction capabilities
    pub fn with_modes(mut self, modes: ParameterModes) -> Self {
        self.modes = modes;
        self
    }

    /// Set a default value for this parameter
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn is_input(&self) -> bool {
        self.modes.input
    }

    pub fn is_output(&self) -> bool {
        self.modes.output
    }

    pub fn is_control(&self) -> bool {
        self.data_type.is_control()
    }
}

/// A directed edge from an output parameter to an input parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Source node name
    pub source_node: NodeId,
    /// Source parameter name
    pub source_parameter: ParameterName,
    /// Target node name
    pub target_node: NodeId,
    /// Target parameter name
    pub target_parameter: ParameterName,
}
