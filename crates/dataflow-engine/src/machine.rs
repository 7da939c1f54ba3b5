//! Resolution state machine
//!
//! Resolves a requested node by walking its unresolved dependencies
//! depth-first, one focus at a time. The machine moves through four states:
//!
//! - `InitializeSpotlight`: redirect to atomic groups, detour to a group's
//!   unresolved external inputs, mark the node resolving, position its cursor
//! - `EvaluateParameter`: push the upstream node of the spotlighted
//!   parameter if it is unresolved, otherwise advance the cursor
//! - `ExecuteNode`: propagate upstream values, validate, run the node's task
//! - `Complete`: terminal
//!
//! Every state's entry can suspend the run while the context is paused, so a
//! debugger can drive the machine one [`ResolutionMachine::tick`] at a time.
//! Only one node executes at any moment; its task is the only place where
//! outside concurrency happens, and its result is joined back before the
//! graph is touched again.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ResolutionConfig;
use crate::context::ResolutionContext;
use crate::error::{EngineError, Result, TaskError};
use crate::events::{EventSink, ResolutionEvent};
use crate::executor::{spawn_task, GroupTask, NodeTask, TaskExecutor};
use crate::graph::FlowGraph;
use crate::types::{Direction, NodeId, NodeOutputs, ResolutionState};
use crate::validation::validate_node_before_run;

/// States of the resolution machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    InitializeSpotlight,
    EvaluateParameter,
    ExecuteNode,
    Complete,
}

/// Where a call to [`ResolutionMachine::tick`] left the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Suspended in step mode; tick again to continue
    Paused,
    /// The requested node resolved
    Resolved,
    /// The run was cancelled and abandoned
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enter,
    Update,
}

enum Entered {
    Proceed,
    Suspend,
}

enum TaskOutcome {
    Finished(std::result::Result<NodeOutputs, TaskError>),
    Cancelled,
}

/// Drives the resolution of one node at a time over a [`FlowGraph`]
pub struct ResolutionMachine {
    context: ResolutionContext,
    state: Option<MachineState>,
    phase: Phase,
    /// Set once the current run has entered its first state
    entered: bool,
    cancelled: bool,
    executor: Arc<dyn TaskExecutor>,
    event_sink: Arc<dyn EventSink>,
    config: ResolutionConfig,
    execution_id: String,
    cancel: CancellationToken,
}

impl ResolutionMachine {
    /// Create a machine with the default configuration
    pub fn new(executor: Arc<dyn TaskExecutor>, event_sink: Arc<dyn EventSink>) -> Self {
        let config = ResolutionConfig::default();
        Self {
            context: ResolutionContext::new(config.max_focus_depth, config.start_paused),
            state: None,
            phase: Phase::Enter,
            entered: false,
            cancelled: false,
            executor,
            event_sink,
            config,
            execution_id: format!("resolve-{}", uuid::Uuid::new_v4()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ResolutionConfig) -> Self {
        self.context = ResolutionContext::new(config.max_focus_depth, config.start_paused);
        self.config = config;
        self
    }

    /// Set the execution ID reported in events
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Current state, `None` before the first `start`
    pub fn state(&self) -> Option<MachineState> {
        self.state
    }

    /// Whether the current run has entered any state yet
    pub fn is_started(&self) -> bool {
        self.state.is_some() && self.entered
    }

    pub fn is_done(&self) -> bool {
        self.state == Some(MachineState::Complete)
    }

    pub fn is_paused(&self) -> bool {
        self.context.paused
    }

    /// Switch step mode on or off; takes effect at the next state entry
    pub fn set_paused(&mut self, paused: bool) {
        self.context.paused = paused;
    }

    /// Focused nodes, bottom first
    pub fn focus_nodes(&self) -> Vec<NodeId> {
        self.context
            .focus_stack
            .nodes()
            .map(|n| n.to_string())
            .collect()
    }

    /// Token that cancels the current run when triggered
    ///
    /// Cancelling it from another task interrupts the node in flight at its
    /// next await point.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve `node` and everything it depends on
    ///
    /// Runs until the node is resolved, the run is cancelled, or (in step
    /// mode) the first suspension point.
    pub async fn resolve_node(&mut self, graph: &mut FlowGraph, node: &str) -> Result<RunStatus> {
        self.start(graph, node)?;
        self.tick(graph).await
    }

    /// Focus `node` and prepare a new run without doing any work yet
    pub fn start(&mut self, graph: &mut FlowGraph, node: &str) -> Result<()> {
        if self.state.is_some() && !self.is_done() {
            return Err(EngineError::AlreadyRunning);
        }
        graph.require(node)?;

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let paused = self.context.paused;
        self.context = ResolutionContext::new(self.config.max_focus_depth, paused);
        self.context.focus_stack.push(node)?;
        self.state = Some(MachineState::InitializeSpotlight);
        self.phase = Phase::Enter;
        self.entered = false;
        self.cancelled = false;

        log::debug!("[{}] Resolution of '{}' started", self.execution_id, node);
        Ok(())
    }

    /// Advance the run until it completes or suspends
    pub async fn tick(&mut self, graph: &mut FlowGraph) -> Result<RunStatus> {
        loop {
            let state = self.state.ok_or(EngineError::NotStarted)?;

            if state == MachineState::Complete {
                self.context.abort(graph);
                return Ok(if self.cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Resolved
                });
            }

            if self.cancel.is_cancelled() {
                log::warn!("[{}] Resolution cancelled", self.execution_id);
                self.request_cancellation_on_stack(graph);
                self.cancelled = true;
                self.transition(MachineState::Complete);
                continue;
            }

            match self.phase {
                Phase::Enter => {
                    let entered = self.on_enter(state, graph);
                    self.entered = true;
                    match entered {
                        Ok(Entered::Proceed) => self.phase = Phase::Update,
                        Ok(Entered::Suspend) => {
                            self.phase = Phase::Update;
                            return Ok(RunStatus::Paused);
                        }
                        Err(err) => return Err(self.fail(graph, err)),
                    }
                }
                Phase::Update => match self.on_update(state, graph).await {
                    Ok(next) => self.transition(next),
                    Err(err) => return Err(self.fail(graph, err)),
                },
            }
        }
    }

    /// Cancel the run
    ///
    /// Flags every focused node, triggers the run token, and cancels and
    /// awaits the task attached to the top focus, if any. The next tick
    /// finishes the run as cancelled.
    pub async fn cancel_all(&mut self, graph: &mut FlowGraph) {
        self.request_cancellation_on_stack(graph);
        self.cancel.cancel();
        let task = self
            .context
            .focus_stack
            .peek_mut()
            .ok()
            .and_then(|focus| focus.task.take());
        if let Some(task) = task {
            task.cancel_and_join().await;
        }
    }

    /// Return to the un-started state
    ///
    /// Empties the focus stack, rolling resolving nodes back to unresolved
    /// and clearing the top node's scratch state. With `cancel` set, a task
    /// still attached to the top focus is told to stop but not awaited;
    /// call [`ResolutionMachine::cancel_all`] first to wait for it.
    pub fn reset(&mut self, graph: &mut FlowGraph, cancel: bool) {
        if cancel {
            if let Ok(focus) = self.context.focus_stack.peek() {
                if let Some(task) = &focus.task {
                    task.cancel();
                }
            }
            self.cancel.cancel();
        }
        self.context.abort(graph);
        self.state = None;
        self.phase = Phase::Enter;
        self.entered = false;
        self.cancelled = false;
        self.cancel = CancellationToken::new();
    }

    fn transition(&mut self, next: MachineState) {
        if self.state != Some(next) {
            log::trace!("[{}] -> {:?}", self.execution_id, next);
        }
        self.state = Some(next);
        self.phase = Phase::Enter;
        self.entered = true;
    }

    fn fail(&mut self, graph: &mut FlowGraph, err: EngineError) -> EngineError {
        log::error!("[{}] Resolution aborted: {}", self.execution_id, err);
        self.context.abort(graph);
        self.state = None;
        self.phase = Phase::Enter;
        self.entered = false;
        err
    }

    fn emit(&self, event: ResolutionEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("[{}] Failed to deliver event: {}", self.execution_id, e);
        }
    }

    fn request_cancellation_on_stack(&self, graph: &mut FlowGraph) {
        for name in self.context.focus_stack.nodes() {
            if let Some(node) = graph.node_mut(name) {
                node.request_cancellation();
            }
        }
    }

    fn focused_node(&self) -> Result<NodeId> {
        Ok(self.context.focus_stack.peek()?.node.clone())
    }

    fn on_enter(&mut self, state: MachineState, graph: &mut FlowGraph) -> Result<Entered> {
        match state {
            MachineState::InitializeSpotlight => {
                if !self.entered && self.context.paused {
                    return Ok(Entered::Suspend);
                }
                Ok(Entered::Proceed)
            }
            MachineState::EvaluateParameter => {
                let name = self.focused_node()?;
                let node = graph.require(&name)?;
                if let Some(parameter) = node.current_parameter() {
                    self.emit(ResolutionEvent::Spotlight {
                        execution_id: self.execution_id.clone(),
                        node: name.clone(),
                        parameter: parameter.name.clone(),
                    });
                }
                Ok(self.pause_point())
            }
            MachineState::ExecuteNode => self.prepare_execution(graph),
            MachineState::Complete => Ok(Entered::Proceed),
        }
    }

    async fn on_update(
        &mut self,
        state: MachineState,
        graph: &mut FlowGraph,
    ) -> Result<MachineState> {
        match state {
            MachineState::InitializeSpotlight => self.initialize_spotlight(graph),
            MachineState::EvaluateParameter => self.evaluate_parameter(graph),
            MachineState::ExecuteNode => self.execute_node(graph).await,
            MachineState::Complete => Ok(MachineState::Complete),
        }
    }

    fn pause_point(&self) -> Entered {
        if self.context.paused {
            Entered::Suspend
        } else {
            Entered::Proceed
        }
    }

    fn initialize_spotlight(&mut self, graph: &mut FlowGraph) -> Result<MachineState> {
        let Ok(focus) = self.context.focus_stack.peek() else {
            return Ok(MachineState::Complete);
        };
        let focused = focus.node.clone();

        let name = graph.effective_node(&focused);
        if name != focused {
            log::debug!(
                "[{}] '{}' runs inside group '{}', focusing the group",
                self.execution_id,
                focused,
                name
            );
            self.context.focus_stack.replace_top(name.clone())?;
        }

        if graph.require(&name)?.is_group() {
            let external = graph.external_connections(&name);
            for connection in &external.incoming {
                if let Some(dependency) =
                    self.pending_dependency(graph, &name, &connection.source_node)?
                {
                    log::debug!(
                        "[{}] Group '{}' waits on external input from '{}'",
                        self.execution_id,
                        name,
                        dependency
                    );
                    self.context.focus_stack.push(dependency)?;
                    return Ok(MachineState::InitializeSpotlight);
                }
            }
        }

        let state = graph.require(&name)?.state();
        if state == ResolutionState::Unresolved && self.config.invalidate_downstream {
            graph.invalidate_downstream(&name);
        }

        let node = graph.require_mut(&name)?;
        if state != ResolutionState::Resolving {
            node.clear_run_state();
        }
        node.set_state(ResolutionState::Resolving);

        if node.current_parameter().is_some() || node.advance_parameter() {
            Ok(MachineState::EvaluateParameter)
        } else {
            Ok(MachineState::ExecuteNode)
        }
    }

    /// The node that must resolve before `node` can use `upstream`, if any
    ///
    /// Redirects to the owning atomic group; an already resolved group
    /// counts as satisfied without checking whether it is still fresh.
    fn pending_dependency(
        &self,
        graph: &FlowGraph,
        node: &str,
        upstream: &str,
    ) -> Result<Option<NodeId>> {
        if graph.require(upstream)?.state() == ResolutionState::Resolved {
            return Ok(None);
        }
        if self.context.focus_stack.contains(upstream) {
            log::warn!("[{}] Cycle between '{}' and '{}'", self.execution_id, node, upstream);
            return Err(EngineError::Cycle {
                node: node.to_string(),
                upstream: upstream.to_string(),
            });
        }

        let effective = graph.effective_node(upstream);
        if effective != upstream {
            log::debug!(
                "[{}] Dependency '{}' redirected to group '{}'",
                self.execution_id,
                upstream,
                effective
            );
            if graph.require(&effective)?.state() == ResolutionState::Resolved {
                return Ok(None);
            }
            if self.context.focus_stack.contains(&effective) {
                return Err(EngineError::Cycle {
                    node: node.to_string(),
                    upstream: effective,
                });
            }
        }
        Ok(Some(effective))
    }

    fn evaluate_parameter(&mut self, graph: &mut FlowGraph) -> Result<MachineState> {
        let name = self.focused_node()?;
        let node = graph.require(&name)?;
        let Some(parameter) = node.current_parameter() else {
            return Ok(MachineState::InitializeSpotlight);
        };
        let parameter = parameter.name.clone();

        let upstream = graph
            .get_connected_node(&name, &parameter, Direction::Upstream)
            .map(|(n, _)| n.name().to_string());
        if let Some(upstream) = upstream {
            if let Some(dependency) = self.pending_dependency(graph, &name, &upstream)? {
                self.context.focus_stack.push(dependency)?;
                return Ok(MachineState::InitializeSpotlight);
            }
        }

        if graph.require_mut(&name)?.advance_parameter() {
            Ok(MachineState::InitializeSpotlight)
        } else {
            Ok(MachineState::ExecuteNode)
        }
    }

    /// Entry of `ExecuteNode`: everything up to, but not including, the run
    fn prepare_execution(&mut self, graph: &mut FlowGraph) -> Result<Entered> {
        let name = self.focused_node()?;
        self.emit(ResolutionEvent::CurrentNode {
            execution_id: self.execution_id.clone(),
            node: name.clone(),
        });

        if graph.require(&name)?.is_locked() {
            return Ok(Entered::Proceed);
        }

        self.propagate_values(graph, &name)?;

        let node = graph.require_mut(&name)?;
        node.output_values_mut().silent_clear();

        for (parameter, value) in node.input_values() {
            self.emit(ResolutionEvent::ParameterValueUpdate {
                execution_id: self.execution_id.clone(),
                node: name.clone(),
                parameter: parameter.name.clone(),
                data_type: parameter.data_type.to_string(),
                value: value.clone(),
            });
        }

        let task = self.build_task(graph, &name)?;
        let problems = validate_node_before_run(graph.require(&name)?, &*self.executor, &task);
        if !problems.is_empty() {
            return Err(EngineError::Validation {
                node: name,
                problems,
            });
        }

        Ok(self.pause_point())
    }

    /// Copy upstream outputs into the node's inputs
    fn propagate_values(&self, graph: &mut FlowGraph, name: &str) -> Result<()> {
        let node = graph.require(name)?;
        let mut deliveries: Vec<(NodeId, String, serde_json::Value)> = Vec::new();

        let mut incoming: Vec<_> = node
            .parameters()
            .iter()
            .filter(|p| p.is_input() && !p.is_control())
            .filter_map(|p| graph.connections().upstream(name, &p.name))
            .cloned()
            .collect();
        if node.is_group() {
            incoming.extend(graph.external_connections(name).incoming);
        }

        for connection in incoming {
            let owner = graph.effective_node(&connection.source_node);
            if graph.require(&owner)?.state() != ResolutionState::Resolved {
                continue;
            }
            let value = graph
                .require(&connection.source_node)?
                .get_output_value(&connection.source_parameter)
                .cloned();
            if let Some(value) = value {
                deliveries.push((connection.target_node, connection.target_parameter, value));
            }
        }

        for (target, parameter, value) in deliveries {
            log::debug!(
                "[{}] Propagating value into {}.{}",
                self.execution_id,
                target,
                parameter
            );
            graph.set_parameter_value(&target, &parameter, value)?;
        }
        Ok(())
    }

    fn build_task(&self, graph: &FlowGraph, name: &str) -> Result<NodeTask> {
        let node = graph.require(name)?;
        let mut inputs: NodeOutputs = node
            .input_values()
            .into_iter()
            .map(|(p, v)| (p.name.clone(), v.clone()))
            .collect();

        let group = match node.group_spec() {
            Some(spec) => {
                for mapping in &spec.exposed_inputs {
                    let value = graph
                        .require(&mapping.internal_node)?
                        .get_parameter_value(&mapping.internal_parameter);
                    if let Some(value) = value {
                        inputs.insert(mapping.group_parameter.clone(), value.clone());
                    }
                }
                Some(GroupTask {
                    execution_environment: spec.execution_environment.clone(),
                    members: graph.descendants(name),
                })
            }
            None => None,
        };

        Ok(NodeTask {
            node: name.to_string(),
            node_type: node.node_type().to_string(),
            inputs,
            group,
            cancel: self.cancel.child_token(),
        })
    }

    async fn execute_node(&mut self, graph: &mut FlowGraph) -> Result<MachineState> {
        let name = self.focused_node()?;

        if graph.require(&name)?.is_locked() {
            log::debug!("[{}] '{}' is locked, skipping execution", self.execution_id, name);
            let node = graph.require_mut(&name)?;
            node.set_state(ResolutionState::Resolved);
            let event = ResolutionEvent::NodeResolved {
                execution_id: self.execution_id.clone(),
                node: name.clone(),
                node_type: node.node_type().to_string(),
                outputs: node.output_values().to_map(),
            };
            self.emit(event);
        } else {
            // A tick dropped mid-await leaves the task attached to its focus
            if self.context.focus_stack.peek()?.task.is_none() {
                log::info!("[{}] Executing '{}'", self.execution_id, name);
                self.emit(ResolutionEvent::NodeStarted {
                    execution_id: self.execution_id.clone(),
                    node: name.clone(),
                });

                let task = self.build_task(graph, &name)?;
                let running = spawn_task(self.executor.clone(), task);
                self.context.focus_stack.peek_mut()?.task = Some(running);
            }

            match self.await_focus_task(graph).await? {
                TaskOutcome::Cancelled => {
                    graph.require_mut(&name)?.set_state(ResolutionState::Unresolved);
                    self.emit_finished(&name);
                    log::warn!("[{}] '{}' cancelled", self.execution_id, name);
                    self.cancelled = true;
                    self.context.abort(graph);
                    return Ok(MachineState::Complete);
                }
                TaskOutcome::Finished(Err(err)) => {
                    graph.require_mut(&name)?.set_state(ResolutionState::Unresolved);
                    self.emit_finished(&name);
                    self.cancel.cancel();
                    return Err(EngineError::execution(name, err));
                }
                TaskOutcome::Finished(Ok(outputs)) => {
                    self.store_outputs(graph, &name, outputs)?;
                    let node = graph.require_mut(&name)?;
                    node.set_state(ResolutionState::Resolved);
                    let event = ResolutionEvent::NodeResolved {
                        execution_id: self.execution_id.clone(),
                        node: name.clone(),
                        node_type: node.node_type().to_string(),
                        outputs: node.output_values().to_map(),
                    };
                    self.emit(event);
                    self.emit_finished(&name);
                    log::info!("[{}] '{}' resolved", self.execution_id, name);
                }
            }
        }

        self.context.focus_stack.pop();
        if self.context.focus_stack.is_empty() {
            Ok(MachineState::Complete)
        } else {
            Ok(MachineState::EvaluateParameter)
        }
    }

    fn emit_finished(&self, name: &str) {
        self.emit(ResolutionEvent::NodeFinished {
            execution_id: self.execution_id.clone(),
            node: name.to_string(),
        });
    }

    /// Wait for the top focus's task, or for the run to be cancelled
    async fn await_focus_task(&mut self, graph: &mut FlowGraph) -> Result<TaskOutcome> {
        let cancel = self.cancel.clone();
        let focus = self.context.focus_stack.peek_mut()?;
        let Some(task) = focus.task.as_mut() else {
            return Ok(TaskOutcome::Cancelled);
        };

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = task.handle_mut() => Some(joined),
        };
        let task = focus.task.take();

        match joined {
            Some(Ok(result)) => Ok(TaskOutcome::Finished(result)),
            Some(Err(err)) if err.is_cancelled() => Ok(TaskOutcome::Cancelled),
            Some(Err(err)) => Ok(TaskOutcome::Finished(Err(TaskError::Panicked(
                err.to_string(),
            )))),
            None => {
                self.request_cancellation_on_stack(graph);
                if let Some(task) = task {
                    task.cancel_and_join().await;
                }
                Ok(TaskOutcome::Cancelled)
            }
        }
    }

    /// Record fresh outputs, mirroring group outputs into the mapped children
    fn store_outputs(&self, graph: &mut FlowGraph, name: &str, outputs: NodeOutputs) -> Result<()> {
        let node = graph.require_mut(name)?;
        let mirrors: Vec<(NodeId, String, serde_json::Value)> = node
            .group_spec()
            .map(|spec| {
                spec.exposed_outputs
                    .iter()
                    .filter_map(|m| {
                        outputs.get(&m.group_parameter).map(|v| {
                            (m.internal_node.clone(), m.internal_parameter.clone(), v.clone())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (parameter, value) in outputs {
            node.output_values_mut().insert(parameter, value);
        }
        for (child, parameter, value) in mirrors {
            graph
                .require_mut(&child)?
                .output_values_mut()
                .insert(parameter, value);
        }
        Ok(())
    }
}
