/// Expression Engine
///
/// Sandboxed Lua evaluation for link transfer code and activity-authored logic.
/// It provides:
/// - A process-wide catalog of libraries scripts may import
/// - JSON <-> Lua value conversion
/// - The per-call evaluator with strict scoping and enriched errors

// Library catalog built once per process
pub mod catalog;

// Value conversion between serde_json and mlua
pub mod convert;

// Sandboxed snippet evaluator
pub mod engine;

// Re-export main types
pub use catalog::{Library, LibraryCatalog};
pub use engine::{RegistryEntry, ScriptEngine, ScriptError, ScriptScope};
