/// Flow Instance Layer
///
/// This module wraps a stitched flow into something that can be run and resumed:
/// - Execution requests and their payload kinds
/// - The instance façade with identity and timing metadata
/// - The durable snapshot persisted between attempts

// Start/resume requests and payloads
pub mod request;

// Instance construction, execution and snapshots
pub mod flow_instance;

// Re-export commonly used types
pub use flow_instance::{FlowInstance, FlowInstanceData};
pub use request::{Payload, WorkflowRequest};
