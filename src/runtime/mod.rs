/// Runtime Execution Engine
///
/// This module drives one execution attempt of a stitched flow.
/// It handles:
/// - Traversal with join semantics and terminal-state classification
/// - The typed variable bag seeded before traversal
/// - The durable execution log and the real-time log relay
/// - Pluggable activity kinds

// Traversal and state machine of one execution attempt
pub mod context;

// Variable bag with typed accessors
pub mod variables;

// Durable log, truncation and real-time sinks
pub mod log;

// Activity handler trait, registry and built-in kinds
pub mod activities;

// Re-export main types
pub use activities::{ActivityError, ActivityHandler, ActivityOutcome, ActivityRegistry, HandlerContext};
pub use context::{Entry, ExecutionContext, ExecutionEnv, ExecutionState, Seed, TraversalError};
pub use log::{ChannelLogSink, ExecutionLog, LogEntry, LogEvent, LogLevel, LogRelay, LogSink};
pub use variables::{VariableBag, VariableError};
