/// Stitchflow: workflow orchestration engine
///
/// This library executes directed graphs of activities connected by data-flow
/// links, suspends them while waiting for external input and resumes them from
/// durable snapshots. Link expressions and activity logic run in a sandboxed
/// Lua evaluator.

// Core configuration and setup
pub mod config;

// Flow model and graph stitching
pub mod flow;

// Sandboxed expression engine
pub mod script;

// Execution context, variables, logging and activity kinds
pub mod runtime;

// Flow instance façade, requests and snapshots
pub mod instance;

// External collaborators and the request runner
pub mod runner;

// HTTP API layer - execution endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use flow::{Activity, ActivityState, Flow, FlowDefinition, Link};
pub use instance::{FlowInstance, FlowInstanceData, Payload, WorkflowRequest};
pub use runner::FlowRunner;
pub use runtime::{ExecutionContext, ExecutionState};
pub use server::start_server;
