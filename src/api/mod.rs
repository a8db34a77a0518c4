/// HTTP API Layer
///
/// This module provides the REST boundary of the engine. It handles:
/// - Parsing start and resume requests
/// - Handing them to the runner, in the background or inline

// Execution endpoints
pub mod execute;

// Re-export router builders
pub use execute::{create_execute_routes, AppState};
