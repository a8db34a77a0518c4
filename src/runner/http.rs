/// HTTP collaborators
///
/// Talks to the caller's API for definitions, instances, results and identity,
/// and pushes log events to its workflow hub. Every call carries the request's
/// bearer token when one was supplied.

use crate::flow::types::FlowDefinition;
use crate::instance::FlowInstanceData;
use crate::runner::collaborators::{Endpoint, FlowStore, Identity, IdentityLookup};
use crate::runtime::log::{LogEvent, LogSink};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Hub route receiving real-time log events
pub const CONSOLE_SEND_PATH: &str = "Hubs/Workflow/ConsoleSend";

/// Flow store and identity lookup backed by the caller's REST API
#[derive(Debug, Clone, Default)]
pub struct HttpApi {
    client: Client,
}

impl HttpApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &Endpoint, path: &str) -> Result<T> {
        let url = endpoint.url(path);
        tracing::debug!("🌐 GET {}", url);

        let response = authorize(self.client.get(&url), endpoint)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET {} returned {}: {}", url, status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid response body from {}: {}", url, e))
    }
}

fn authorize(builder: RequestBuilder, endpoint: &Endpoint) -> RequestBuilder {
    match &endpoint.auth_token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

#[async_trait]
impl FlowStore for HttpApi {
    async fn get_definition(&self, endpoint: &Endpoint, flow_id: Uuid) -> Result<FlowDefinition> {
        self.get_json(endpoint, &format!("Core/FlowDefinition({})", flow_id)).await
    }

    async fn get_instance(&self, endpoint: &Endpoint, instance_id: Uuid) -> Result<FlowInstanceData> {
        self.get_json(endpoint, &format!("Core/FlowInstanceData({})", instance_id))
            .await
    }

    async fn save_result(&self, endpoint: &Endpoint, data: &FlowInstanceData) -> Result<()> {
        let url = endpoint.url(&format!("Core/FlowInstanceData({})", data.id));
        tracing::debug!("🌐 PUT {}", url);

        let response = authorize(self.client.put(&url), endpoint)
            .json(data)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Saving instance {} returned {}: {}", data.id, status, body));
        }

        tracing::info!("💾 Saved instance {} ({:?})", data.id, data.execution_state);
        Ok(())
    }
}

#[async_trait]
impl IdentityLookup for HttpApi {
    async fn who_am_i(&self, endpoint: &Endpoint) -> Result<Identity> {
        self.get_json(endpoint, "Core/User/Me()").await
    }
}

/// Pushes log events to the caller's workflow hub
#[derive(Debug, Clone)]
pub struct HttpLogSink {
    client: Client,
    endpoint: Endpoint,
}

impl HttpLogSink {
    pub fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn send(&self, event: &LogEvent) -> Result<()> {
        let url = self.endpoint.url(CONSOLE_SEND_PATH);
        let response = authorize(self.client.post(&url), &self.endpoint)
            .json(event)
            .send()
            .await?;
        response
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Log hub rejected event: {}", e))?;
        Ok(())
    }
}
