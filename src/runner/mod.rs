/// Runner Layer
///
/// This module connects the engine to the outside world:
/// - Collaborator traits for fetching, saving and identity lookup
/// - HTTP implementations against the caller's API
/// - A local SQLite store
/// - The runner that processes one request end to end

// Flow store and identity lookup contracts
pub mod collaborators;

// reqwest-backed API client and log hub sink
pub mod http;

// sqlx-backed local store
pub mod storage;

// Request processing
pub mod flow_runner;

// Re-export main types
pub use collaborators::{Endpoint, FlowStore, Identity, IdentityLookup, StaticIdentity};
pub use flow_runner::{FlowRunner, SinkFactory};
pub use http::{HttpApi, HttpLogSink};
pub use storage::SqliteStore;
