/// Flow Model
///
/// This module holds the static description of a workflow and the stitcher
/// that derives its run-time wiring:
/// - Type definitions (Flow, Activity, Link, FlowDefinition)
/// - Previous/next edge derivation and transfer-code generation
/// - Petgraph view for cycle and reachability checks

// Core flow type definitions
pub mod types;

// Graph stitching: edges and combined link expressions per activity
pub mod stitch;

// Re-export commonly used types
pub use stitch::{stitch, FlowGraph, StitchIssue, StitchPiece};
pub use types::{Activity, ActivityState, Flow, FlowDefinition, FlowError, Link};
