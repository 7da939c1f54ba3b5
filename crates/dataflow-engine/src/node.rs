//! Nodes and their per-run bookkeeping
//!
//! A [`Node`] is the unit the engine resolves. Besides its declared
//! parameters and stored values it keeps a parameter cursor, which the
//! resolution machine advances one input at a time while it checks
//! upstream dependencies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;
use crate::groups::GroupSpec;
use crate::types::{NodeId, NodeOutputs, Parameter, ParameterName, ResolutionState};

/// What kind of node this is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// A plain node executed by a task executor
    #[default]
    Task,
    /// A node that owns a nested subgraph
    Group(GroupSpec),
}

/// Output values most recently produced by a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputValues {
    values: NodeOutputs,
}

impl OutputValues {
    pub fn get(&self, parameter: &str) -> Option<&serde_json::Value> {
        self.values.get(parameter)
    }

    pub fn insert(&mut self, parameter: impl Into<String>, value: serde_json::Value) {
        self.values.insert(parameter.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterName, &serde_json::Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every value without notifying anyone
    pub fn silent_clear(&mut self) {
        self.values.clear();
    }

    /// Copy of the values as a plain map
    pub fn to_map(&self) -> NodeOutputs {
        self.values.clone()
    }
}

/// A node in a dataflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    name: NodeId,
    node_type: String,
    #[serde(default)]
    state: ResolutionState,
    parameters: Vec<Parameter>,
    #[serde(default)]
    parameter_values: HashMap<ParameterName, serde_json::Value>,
    #[serde(default)]
    parameter_output_values: OutputValues,
    #[serde(default)]
    lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_group: Option<NodeId>,
    #[serde(default)]
    kind: NodeKind,
    /// Index into `parameters` of the spotlighted parameter
    #[serde(skip)]
    current_parameter: Option<usize>,
    #[serde(skip)]
    cancellation_requested: bool,
}

impl Node {
    /// Create a task node with no parameters
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            state: ResolutionState::Unresolved,
            parameters: Vec::new(),
            parameter_values: HashMap::new(),
            parameter_output_values: OutputValues::default(),
            lock: false,
            parent_group: None,
            kind: NodeKind::Task,
            current_parameter: None,
            cancellation_requested: false,
        }
    }

    /// Create a group node
    pub fn group(name: impl Into<String>, node_type: impl Into<String>, spec: GroupSpec) -> Self {
        let mut node = Self::new(name, node_type);
        node.kind = NodeKind::Group(spec);
        node
    }

    /// Add a parameter; declaration order is traversal order
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    pub fn set_state(&mut self, state: ResolutionState) {
        self.state = state;
    }

    pub fn is_locked(&self) -> bool {
        self.lock
    }

    pub fn set_lock(&mut self, lock: bool) {
        self.lock = lock;
    }

    /// The group that owns this node, if any
    pub fn parent_group(&self) -> Option<&str> {
        self.parent_group.as_deref()
    }

    pub(crate) fn set_parent_group(&mut self, group: Option<NodeId>) {
        self.parent_group = group;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn group_spec(&self) -> Option<&GroupSpec> {
        match &self.kind {
            NodeKind::Group(spec) => Some(spec),
            NodeKind::Task => None,
        }
    }

    pub(crate) fn group_spec_mut(&mut self) -> Option<&mut GroupSpec> {
        match &mut self.kind {
            NodeKind::Group(spec) => Some(spec),
            NodeKind::Task => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Look up a parameter that must exist
    ///
    /// # Panics
    ///
    /// Panics if the node does not declare `name`; that is a graph
    /// construction bug, not a runtime condition.
    pub fn expect_parameter(&self, name: &str) -> &Parameter {
        match self.parameter(name) {
            Some(parameter) => parameter,
            None => panic!("node '{}' has no parameter '{}'", self.name, name),
        }
    }

    /// The parameter currently under the spotlight
    pub fn current_parameter(&self) -> Option<&Parameter> {
        self.current_parameter.and_then(|i| self.parameters.get(i))
    }

    /// Move the cursor to the next non-control parameter
    ///
    /// Returns false and clears the cursor once every parameter has been
    /// visited.
    pub fn advance_parameter(&mut self) -> bool {
        let start = self.current_parameter.map_or(0, |i| i + 1);
        let next = self
            .parameters
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, p)| !p.is_control())
            .map(|(i, _)| i);
        self.current_parameter = next;
        next.is_some()
    }

    /// Rewind the parameter cursor
    pub fn initialize_spotlight(&mut self) {
        self.current_parameter = None;
    }

    /// Stored value for a parameter, falling back to its default
    pub fn get_parameter_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameter_values
            .get(name)
            .or_else(|| self.parameter(name).and_then(|p| p.default_value.as_ref()))
    }

    /// Store a value on a parameter
    pub fn set_parameter_value(
        &mut self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), ConnectionError> {
        if self.parameter(name).is_none() {
            return Err(ConnectionError::UnknownParameter {
                node: self.name.clone(),
                parameter: name.to_string(),
            });
        }
        self.parameter_values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn output_values(&self) -> &OutputValues {
        &self.parameter_output_values
    }

    pub fn output_values_mut(&mut self) -> &mut OutputValues {
        &mut self.parameter_output_values
    }

    /// Value this node offers on an output parameter
    ///
    /// A freshly produced output wins over a stored value.
    pub fn get_output_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameter_output_values
            .get(name)
            .or_else(|| self.get_parameter_value(name))
    }

    /// Every input parameter that currently holds a concrete value
    pub fn input_values(&self) -> Vec<(&Parameter, &serde_json::Value)> {
        self.parameters
            .iter()
            .filter(|p| p.is_input() && !p.is_control())
            .filter_map(|p| self.get_parameter_value(&p.name).map(|v| (p, v)))
            .collect()
    }

    /// Built-in pre-run checks: every required input must hold a value
    pub fn validate_before_node_run(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.required && p.is_input() && !p.is_control())
            .filter(|p| match self.get_parameter_value(&p.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(_) => false,
            })
            .map(|p| format!("Required input '{}' has no value", p.name))
            .collect()
    }

    pub fn request_cancellation(&mut self) {
        self.cancellation_requested = true;
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation_requested
    }

    /// Discard scratch state left behind by an interrupted run
    pub fn clear_run_state(&mut self) {
        self.current_parameter = None;
        self.cancellation_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParameterType;

    fn sample_node() -> Node {
        Node::new("resize", "image-resize").with_parameters([
            Parameter::control_in("exec_in"),
            Parameter::input("image", ParameterType::Image).required(),
            Parameter::input("width", ParameterType::Integer).with_default(serde_json::json!(512)),
            Parameter::output("resized", ParameterType::Image),
        ])
    }

    #[test]
    fn test_advance_skips_control_parameters() {
        let mut node = sample_node();
        assert!(node.current_parameter().is_none());

        assert!(node.advance_parameter());
        assert_eq!(node.current_parameter().unwrap().name, "image");
        assert!(node.advance_parameter());
        assert_eq!(node.current_parameter().unwrap().name, "width");
        assert!(node.advance_parameter());
        assert_eq!(node.current_parameter().unwrap().name, "resized");
        assert!(!node.advance_parameter());
        assert!(node.current_parameter().is_none());
    }

    #[test]
    fn test_initialize_spotlight_rewinds() {
        let mut node = sample_node();
        node.advance_parameter();
        node.advance_parameter();
        node.initialize_spotlight();
        assert!(node.advance_parameter());
        assert_eq!(node.current_parameter().unwrap().name, "image");
    }

    #[test]
    fn test_node_without_parameters_cannot_advance() {
        let mut node = Node::new("noop", "noop");
        assert!(!node.advance_parameter());
    }

    #[test]
    fn test_parameter_values_and_defaults() {
        let mut node = sample_node();
        assert_eq!(node.get_parameter_value("width"), Some(&serde_json::json!(512)));
        node.set_parameter_value("width", serde_json::json!(1024)).unwrap();
        assert_eq!(node.get_parameter_value("width"), Some(&serde_json::json!(1024)));

        let err = node.set_parameter_value("height", serde_json::json!(1)).unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownParameter { .. }));
    }

    #[test]
    fn test_output_prefers_fresh_value() {
        let mut node = sample_node();
        node.set_parameter_value("resized", serde_json::json!("stale.png")).unwrap();
        assert_eq!(node.get_output_value("resized"), Some(&serde_json::json!("stale.png")));

        node.output_values_mut().insert("resized", serde_json::json!("fresh.png"));
        assert_eq!(node.get_output_value("resized"), Some(&serde_json::json!("fresh.png")));

        node.output_values_mut().silent_clear();
        assert!(node.output_values().is_empty());
        assert_eq!(node.get_output_value("resized"), Some(&serde_json::json!("stale.png")));
    }

    #[test]
    fn test_validate_required_inputs() {
        let mut node = sample_node();
        let problems = node.validate_before_node_run();
        assert_eq!(problems, vec!["Required input 'image' has no value".to_string()]);

        node.set_parameter_value("image", serde_json::json!("in.png")).unwrap();
        assert!(node.validate_before_node_run().is_empty());
    }

    #[test]
    #[should_panic(expected = "has no parameter 'missing'")]
    fn test_expect_parameter_panics() {
        sample_node().expect_parameter("missing");
    }

    #[test]
    fn test_clear_run_state() {
        let mut node = sample_node();
        node.advance_parameter();
        node.request_cancellation();
        node.clear_run_state();
        assert!(node.current_parameter().is_none());
        assert!(!node.is_cancellation_requested());
    }
}
