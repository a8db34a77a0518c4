/// External collaborators of the runner
///
/// Definitions and instances are fetched from, and results saved to, a flow
/// store; the caller is resolved through an identity lookup. Both receive the
/// request's endpoint so HTTP implementations can address the caller's API.

use crate::flow::types::FlowDefinition;
use crate::instance::FlowInstanceData;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport root and bearer credential of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub api: String,
    pub auth_token: Option<String>,
}

impl Endpoint {
    pub fn new(api: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            api: api.into(),
            auth_token,
        }
    }

    /// `path` under the API root, with exactly one separating slash
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// The caller of an execution attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub email: String,
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn get_definition(&self, endpoint: &Endpoint, flow_id: Uuid) -> Result<FlowDefinition>;

    async fn get_instance(&self, endpoint: &Endpoint, instance_id: Uuid) -> Result<FlowInstanceData>;

    /// Overwrite the stored result of `data.id`
    async fn save_result(&self, endpoint: &Endpoint, data: &FlowInstanceData) -> Result<()>;
}

#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn who_am_i(&self, endpoint: &Endpoint) -> Result<Identity>;
}

/// Fixed identity, used when no identity service is reachable
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Identity);

#[async_trait]
impl IdentityLookup for StaticIdentity {
    async fn who_am_i(&self, _endpoint: &Endpoint) -> Result<Identity> {
        Ok(self.0.clone())
    }
}
