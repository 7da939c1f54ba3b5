//! Dataflow Engine - demand-driven resolution of node graphs
//!
//! Given a graph of nodes wired through typed parameters, resolving a node
//! executes exactly the upstream nodes whose outputs are not yet resolved,
//! in dependency order, then the node itself. Results flow along the
//! connections as parameter values.
//!
//! - Explicit focus stack instead of recursion, so a run can pause between
//!   any two steps and be cancelled from outside
//! - Atomic groups: a subgraph with a non-local execution environment runs
//!   as one unit in place of its children
//! - Downstream invalidation when an upstream node is re-resolved
//! - Pluggable executors (`TaskExecutor`, `NodeRegistry`) and event sinks
//!
//! # Architecture
//!
//! - `FlowGraph`: node arena, connection index and group ownership
//! - `ResolutionMachine`: the four-state machine driving a run
//! - `TaskExecutor`: runs a node's unit of work on the tokio runtime
//! - `EventSink`: receives progress events, fire-and-forget
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{FlowGraphBuilder, NullEventSink, ResolutionMachine, RunStatus};
//!
//! let mut graph = FlowGraphBuilder::new("flow", "Flow")
//!     .add_node(load)
//!     .add_node(caption)
//!     .connect("load", "image", "caption", "image")
//!     .build()?;
//!
//! let mut machine = ResolutionMachine::new(executor, Arc::new(NullEventSink));
//! assert_eq!(machine.resolve_node(&mut graph, "caption").await?, RunStatus::Resolved);
//! ```

pub mod builder;
pub mod composite_executor;
pub mod config;
pub mod connections;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod focus;
pub mod graph;
pub mod groups;
pub mod machine;
pub mod node;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::FlowGraphBuilder;
pub use composite_executor::CompositeTaskExecutor;
pub use config::ResolutionConfig;
pub use connections::ConnectionIndex;
pub use context::ResolutionContext;
pub use error::{ConnectionError, EngineError, Result, TaskError};
pub use events::{
    ChannelEventSink, EventError, EventSink, NullEventSink, ResolutionEvent, VecEventSink,
};
pub use executor::{GroupTask, NodeTask, TaskExecutor};
pub use focus::{Focus, FocusStack, RunningTask};
pub use graph::FlowGraph;
pub use groups::{ExecutionEnvironment, ExternalConnections, GroupSpec, PortMapping};
pub use machine::{MachineState, ResolutionMachine, RunStatus};
pub use node::{Node, NodeKind, OutputValues};
pub use registry::{NodeExecutor, NodeRegistry, NodeTemplate, RegistryTaskExecutor};
pub use types::{
    Connection, ConnectionId, Direction, NodeId, NodeOutputs, Parameter, ParameterModes,
    ParameterName, ParameterType, ResolutionState,
};
pub use validation::{validate_graph, validate_node_before_run, GraphIssue};
