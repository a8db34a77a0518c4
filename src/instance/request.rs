/// Execution requests and their payloads
///
/// A request either starts a flow definition fresh or resumes a persisted
/// instance at a suspended activity. The payload is a closed set of data kinds
/// that converts to a JSON value through a single match.

use crate::runner::collaborators::Endpoint;
use crate::runtime::context::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Input handed to the start activity or the resume point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Json(Value),
    /// Submitted form fields
    Form(Map<String, Value>),
    Text(String),
    #[default]
    Empty,
}

impl Payload {
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Json(value) => value.clone(),
            Payload::Form(fields) => Value::Object(fields.clone()),
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Empty => Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowRequest {
    #[serde(rename_all = "camelCase")]
    Start {
        flow_id: Uuid,
        #[serde(default)]
        data: Payload,
        api: String,
        #[serde(default)]
        auth_token: Option<String>,
        instance_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    Resume {
        instance_id: Uuid,
        resume_from: String,
        #[serde(default)]
        data: Payload,
        api: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl WorkflowRequest {
    pub fn instance_id(&self) -> Uuid {
        match self {
            WorkflowRequest::Start { instance_id, .. } | WorkflowRequest::Resume { instance_id, .. } => *instance_id,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            WorkflowRequest::Start { data, .. } | WorkflowRequest::Resume { data, .. } => data,
        }
    }

    pub fn auth_token(&self) -> Option<&str> {
        match self {
            WorkflowRequest::Start { auth_token, .. } | WorkflowRequest::Resume { auth_token, .. } => {
                auth_token.as_deref()
            }
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            WorkflowRequest::Start { api, auth_token, .. } | WorkflowRequest::Resume { api, auth_token, .. } => {
                Endpoint::new(api.clone(), auth_token.clone())
            }
        }
    }

    /// Where traversal begins for this request
    pub fn entry(&self) -> Entry {
        match self {
            WorkflowRequest::Start { .. } => Entry::Fresh,
            WorkflowRequest::Resume { resume_from, .. } => Entry::Resume(resume_from.clone()),
        }
    }

    /// Pretty JSON dump for the debug log, with the bearer token masked
    pub fn to_log_string(&self) -> String {
        let mut masked = self.clone();
        match &mut masked {
            WorkflowRequest::Start { auth_token, .. } | WorkflowRequest::Resume { auth_token, .. } => {
                if auth_token.is_some() {
                    *auth_token = Some("***".to_string());
                }
            }
        }
        serde_json::to_string_pretty(&masked).unwrap_or_else(|e| format!("<unprintable request: {}>", e))
    }
}
