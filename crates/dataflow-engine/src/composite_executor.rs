//! Composite task executor that chains a host-specific executor with a fallback.
//!
//! The host executor is tried first. If it answers `TaskError::Unhandled`
//! the task falls through to the fallback executor, usually a
//! `RegistryTaskExecutor` holding the standard node types.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::executor::{NodeTask, TaskExecutor};
use crate::types::NodeOutputs;

/// A composite executor that tries a host-specific executor first,
/// then falls back for node types the host does not handle.
pub struct CompositeTaskExecutor {
    /// Host-specific executor (tried first). None if no host overrides.
    host: Option<Arc<dyn TaskExecutor>>,
    /// Fallback for everything the host leaves alone.
    fallback: Arc<dyn TaskExecutor>,
}

impl CompositeTaskExecutor {
    pub fn new(host: Option<Arc<dyn TaskExecutor>>, fallback: Arc<dyn TaskExecutor>) -> Self {
        Self { host, fallback }
    }
}

#[async_trait]
impl TaskExecutor for CompositeTaskExecutor {
    async fn execute_task(&self, task: NodeTask) -> Result<NodeOutputs, TaskError> {
        if let Some(ref host) = self.host {
            match host.execute_task(task.clone()).await {
                Err(TaskError::Unhandled { node_type }) => {
                    log::debug!("Host does not handle '{}', falling back", node_type);
                }
                other => return other,
            }
        }

        self.fallback.execute_task(task).await
    }

    fn validate_before_run(&self, task: &NodeTask) -> Vec<String> {
        let mut problems = self
            .host
            .as_ref()
            .map(|host| host.validate_before_run(task))
            .unwrap_or_default();
        problems.extend(self.fallback.validate_before_run(task));
        problems
    }
}
