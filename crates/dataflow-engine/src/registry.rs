//! Node type registry
//!
//! Maps node type strings to templates (declared parameters) and to
//! executors, so that node implementations can be plugged in without the
//! engine knowing about them.
//!
//! # Usage
//!
//! ```ignore
//! use dataflow_engine::{NodeRegistry, NodeTemplate, RegistryTaskExecutor};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register_sync(NodeTemplate::new("upper"), |task| {
//!     let text = task.require_input("text")?.as_str().unwrap_or_default();
//!     Ok([("text".to_string(), text.to_uppercase().into())].into())
//! });
//!
//! let executor = RegistryTaskExecutor::new(Arc::new(registry));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::executor::{NodeTask, TaskExecutor};
use crate::node::Node;
use crate::types::{NodeOutputs, Parameter};

/// Per-node-type executor
///
/// Unlike `TaskExecutor` which handles every node type via dispatch,
/// a `NodeExecutor` handles exactly one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute this node type
    async fn execute(&self, task: NodeTask) -> Result<NodeOutputs, TaskError>;

    /// Checks specific to this node type
    fn validate(&self, _task: &NodeTask) -> Vec<String> {
        Vec::new()
    }
}

/// Declared shape of a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    /// Unique type identifier (e.g., "image-resize")
    pub node_type: String,
    /// Human-readable label
    pub label: String,
    /// Parameters every instance starts with, in traversal order
    pub parameters: Vec<Parameter>,
}

impl NodeTemplate {
    pub fn new(node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            label: node_type.clone(),
            node_type,
            parameters: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A registration entry combining a template with an optional executor
struct RegistryEntry {
    template: NodeTemplate,
    executor: Option<Arc<dyn NodeExecutor>>,
}

/// Registry of node types with their templates and executors
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node type with its executor
    pub fn register(&mut self, template: NodeTemplate, executor: Arc<dyn NodeExecutor>) {
        self.entries.insert(
            template.node_type.clone(),
            RegistryEntry {
                template,
                executor: Some(executor),
            },
        );
    }

    /// Register a node type backed by an async closure
    pub fn register_callback<F, Fut>(&mut self, template: NodeTemplate, callback: F)
    where
        F: Fn(NodeTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutputs, TaskError>> + Send + 'static,
    {
        let executor = CallbackNodeExecutor {
            callback: Box::new(move |task| -> BoxedTaskFuture { Box::pin(callback(task)) }),
        };
        self.register(template, Arc::new(executor));
    }

    /// Register a node type backed by a synchronous closure
    pub fn register_sync(
        &mut self,
        template: NodeTemplate,
        callback: impl Fn(&NodeTask) -> Result<NodeOutputs, TaskError> + Send + Sync + 'static,
    ) {
        self.register(template, Arc::new(SyncCallbackNodeExecutor::new(callback)));
    }

    /// Register a node type without an executor (e.g., palette listings)
    pub fn register_template(&mut self, template: NodeTemplate) {
        self.entries.insert(
            template.node_type.clone(),
            RegistryEntry {
                template,
                executor: None,
            },
        );
    }

    pub fn get_template(&self, node_type: &str) -> Option<&NodeTemplate> {
        self.entries.get(node_type).map(|e| &e.template)
    }

    pub fn get_executor(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.entries.get(node_type).and_then(|e| e.executor.clone())
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Create a node instance from a registered template
    pub fn instantiate(&self, name: impl Into<String>, node_type: &str) -> Option<Node> {
        let template = self.get_template(node_type)?;
        Some(Node::new(name, node_type).with_parameters(template.parameters.iter().cloned()))
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedTaskFuture = Pin<Box<dyn Future<Output = Result<NodeOutputs, TaskError>> + Send>>;

type BoxedCallback = Box<dyn Fn(NodeTask) -> BoxedTaskFuture + Send + Sync>;

/// Async callback-based NodeExecutor
pub struct CallbackNodeExecutor {
    callback: BoxedCallback,
}

#[async_trait]
impl NodeExecutor for CallbackNodeExecutor {
    async fn execute(&self, task: NodeTask) -> Result<NodeOutputs, TaskError> {
        (self.callback)(task).await
    }
}

/// Synchronous callback-based NodeExecutor
pub struct SyncCallbackNodeExecutor {
    callback: Box<dyn Fn(&NodeTask) -> Result<NodeOutputs, TaskError> + Send + Sync>,
}

impl SyncCallbackNodeExecutor {
    pub fn new(
        callback: impl Fn(&NodeTask) -> Result<NodeOutputs, TaskError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl NodeExecutor for SyncCallbackNodeExecutor {
    async fn execute(&self, task: NodeTask) -> Result<NodeOutputs, TaskError> {
        (self.callback)(&task)
    }
}

/// TaskExecutor implementation that dispatches on `NodeTask::node_type`
pub struct RegistryTaskExecutor {
    registry: Arc<NodeRegistry>,
}

impl RegistryTaskExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Get a reference to the underlying registry
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }
}

#[async_trait]
impl TaskExecutor for RegistryTaskExecutor {
    async fn execute_task(&self, task: NodeTask) -> Result<NodeOutputs, TaskError> {
        let executor = self
            .registry
            .get_executor(&task.node_type)
            .ok_or_else(|| TaskError::Unhandled {
                node_type: task.node_type.clone(),
            })?;
        executor.execute(task).await
    }

    fn validate_before_run(&self, task: &NodeTask) -> Vec<String> {
        match self.registry.get_executor(&task.node_type) {
            Some(executor) => executor.validate(task),
            None => Vec::new(),
        }
    }
}
