//! Configuration for resolution runs

use serde::{Deserialize, Serialize};

/// Default values for [`ResolutionConfig`]
pub mod defaults {
    /// Deepest dependency chain a run may focus before giving up
    pub const MAX_FOCUS_DEPTH: usize = 4096;
    pub const START_PAUSED: bool = false;
    pub const INVALIDATE_DOWNSTREAM: bool = true;
}

/// Settings for a resolution machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Ceiling on the focus stack, guards against malformed graphs
    pub max_focus_depth: usize,
    /// Begin every run in step mode
    pub start_paused: bool,
    /// Mark downstream nodes unresolved when an unresolved node is focused
    pub invalidate_downstream: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_focus_depth: defaults::MAX_FOCUS_DEPTH,
            start_paused: defaults::START_PAUSED,
            invalidate_downstream: defaults::INVALIDATE_DOWNSTREAM,
        }
    }
}

impl ResolutionConfig {
    /// Parse a config from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_focus_depth(mut self, max_focus_depth: usize) -> Self {
        self.max_focus_depth = max_focus_depth;
        self
    }

    pub fn with_start_paused(mut self, start_paused: bool) -> Self {
        self.start_paused = start_paused;
        self
    }

    /// Keep downstream nodes resolved when an upstream node re-runs
    pub fn with_invalidate_downstream(mut self, invalidate_downstream: bool) -> Self {
        self.invalidate_downstream = invalidate_downstream;
        self
    }
}
