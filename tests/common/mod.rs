//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use stitchflow::flow::{Activity, Flow, FlowDefinition, Link};
use stitchflow::instance::{Payload, WorkflowRequest};
use stitchflow::runner::{FlowRunner, Identity, SqliteStore, StaticIdentity};
use stitchflow::runtime::{LogEvent, LogSink};
use uuid::Uuid;

pub const API: &str = "https://api.example.test/";

/// Namespaces allowed in every scenario unless a flow lists its own.
pub fn default_imports() -> Vec<String> {
    ["math", "string", "table", "json"].iter().map(|s| s.to_string()).collect()
}

pub fn identity() -> Identity {
    Identity {
        id: "42".to_string(),
        display_name: "Ada Lovelace".to_string(),
        email: "ada@example.test".to_string(),
    }
}

/// A definition built from `(ref, kind)` pairs and links.
pub fn definition(name: &str, activities: Vec<Activity>, links: Vec<Link>) -> FlowDefinition {
    FlowDefinition::from_flow(Flow {
        id: Uuid::new_v4(),
        name: name.to_string(),
        app_id: 11,
        imports: None,
        activities,
        links,
    })
}

pub fn start_request(flow_id: Uuid, instance_id: Uuid, data: Payload) -> WorkflowRequest {
    WorkflowRequest::Start {
        flow_id,
        data,
        api: API.to_string(),
        auth_token: Some("token".to_string()),
        instance_id,
    }
}

pub fn resume_request(instance_id: Uuid, resume_from: &str, data: Payload) -> WorkflowRequest {
    WorkflowRequest::Resume {
        instance_id,
        resume_from: resume_from.to_string(),
        data,
        api: API.to_string(),
        auth_token: Some("token".to_string()),
    }
}

/// An in-memory store seeded with `definitions`.
pub async fn store_with(definitions: &[FlowDefinition]) -> Arc<SqliteStore> {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    for definition in definitions {
        store.save_definition(definition).await.unwrap();
    }
    Arc::new(store)
}

pub fn runner(store: Arc<SqliteStore>) -> FlowRunner {
    FlowRunner::new(store, Arc::new(StaticIdentity(identity()))).with_imports(default_imports())
}

/// A sink that always fails, to exercise sink disabling.
pub struct BrokenSink;

#[async_trait]
impl LogSink for BrokenSink {
    async fn send(&self, _event: &LogEvent) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("hub offline"))
    }
}
