/// Flow model type definitions
///
/// Defines activities, links and flows. These are serialized to and from JSON for
/// flow definitions and for the persisted execution context of suspended runs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while reading a flow definition
#[derive(Debug, Error)]
pub enum FlowError {
    /// The definition JSON could not be parsed
    #[error("invalid flow definition: {0}")]
    Parse(#[from] serde_json::Error),

    /// A resume request names an activity that is not part of the flow
    #[error("resume point `{0}` is not an activity of this flow")]
    ResumePointNotFound(String),
}

/// Run-time state of a single activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    #[default]
    Pending,
    Running,
    Suspended,
    Complete,
    Failed,
}

/// A single node in the flow graph
///
/// The `kind` selects the pluggable handler that performs the activity's effect.
/// `previous`, `next` and `assign_code` are derived by the stitcher every time a
/// flow instance is built and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Stable reference, unique within the flow (e.g. "Start", "approve-order")
    #[serde(rename = "ref")]
    pub reference: String,
    /// Handler kind (e.g. "start", "script", "form")
    pub kind: String,
    /// Current state, mutated in place during execution
    #[serde(default)]
    pub state: ActivityState,
    /// Typed input payload, populated by the caller or by transfer code
    #[serde(default = "empty_record")]
    pub data: Value,
    /// Kind-specific configuration (e.g. `{ "code": "return 1" }` for scripts)
    #[serde(default = "empty_record")]
    pub config: Value,
    /// Bearer credential handed to the activity by the execution entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// References of the activities linking into this one, in flow order
    #[serde(skip)]
    pub previous: Vec<String>,
    /// References of the activities this one links into, in flow order
    #[serde(skip)]
    pub next: Vec<String>,
    /// Combined data-transfer unit built from the incoming link expressions
    #[serde(skip)]
    pub assign_code: Option<String>,
}

fn empty_record() -> Value {
    json!({})
}

impl Activity {
    /// Create a pending activity with empty data and configuration
    pub fn new(reference: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            kind: kind.into(),
            state: ActivityState::Pending,
            data: empty_record(),
            config: empty_record(),
            auth_token: None,
            previous: Vec::new(),
            next: Vec::new(),
            assign_code: None,
        }
    }

    /// Builder-style helper for kind-specific configuration
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Builder-style helper for the initial data payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.state == ActivityState::Complete
    }

    /// View of the activity handed to scripts
    pub fn to_script_value(&self) -> Value {
        json!({
            "ref": self.reference,
            "kind": self.kind,
            "state": self.state,
            "data": self.data,
            "config": self.config,
        })
    }
}

/// Directed edge between two activities
///
/// The optional expression is Lua transfer code in which `destination.` addresses
/// the destination activity and `source.` addresses the source activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Source activity reference
    pub source: String,
    /// Destination activity reference
    pub destination: String,
    /// Optional data-mapping expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Link {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// The expression, if it carries any non-blank code
    pub fn usable_expression(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// The static activity/link graph of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Flow definition identifier
    pub id: Uuid,
    /// Human-readable flow name
    pub name: String,
    /// Owning application
    #[serde(default)]
    pub app_id: i64,
    /// Allowed script namespaces, overriding the configured defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports: Option<Vec<String>>,
    /// Activities in definition order
    pub activities: Vec<Activity>,
    /// Links in definition order
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Flow {
    /// Find an activity by reference
    pub fn activity(&self, reference: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.reference == reference)
    }

    /// Position of an activity by reference
    pub fn position(&self, reference: &str) -> Option<usize> {
        self.activities.iter().position(|a| a.reference == reference)
    }

    /// True when every activity reached Complete
    pub fn all_complete(&self) -> bool {
        self.activities.iter().all(Activity::is_complete)
    }
}

/// A stored flow definition, as served by the definition collaborator
///
/// The header fields are authoritative: they overwrite the embedded flow's own
/// metadata when the flow is materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Definition identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// Owning application
    #[serde(default)]
    pub app_id: i64,
    /// The activity/link graph
    pub flow: Flow,
}

impl FlowDefinition {
    /// Wrap a flow, taking the header from the flow's own metadata
    pub fn from_flow(flow: Flow) -> Self {
        Self {
            id: flow.id,
            name: flow.name.clone(),
            app_id: flow.app_id,
            flow,
        }
    }

    /// Parse a definition from its JSON form
    pub fn parse(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the definition to JSON
    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Materialise the flow graph with the definition's metadata applied
    pub fn to_flow(&self) -> Flow {
        let mut flow = self.flow.clone();
        flow.id = self.id;
        flow.name = self.name.clone();
        flow.app_id = self.app_id;
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn activity_defaults_fill_missing_fields() {
        let activity: Activity = serde_json::from_value(json!({ "ref": "A", "kind": "pass" })).unwrap();
        assert_eq!(activity.state, ActivityState::Pending);
        assert_eq!(activity.data, json!({}));
        assert!(activity.previous.is_empty());
        assert!(activity.assign_code.is_none());
    }

    #[test]
    fn derived_edges_are_not_persisted() {
        let mut activity = Activity::new("B", "pass");
        activity.previous = vec!["A".to_string()];
        activity.assign_code = Some("function(activity, variables, flow) end".to_string());

        let json = serde_json::to_value(&activity).unwrap();
        assert!(json.get("previous").is_none());
        assert!(json.get("assign_code").is_none());
        assert_eq!(json["ref"], json!("B"));
    }

    #[test]
    fn blank_link_expressions_are_not_usable() {
        assert_eq!(Link::new("A", "B").usable_expression(), None);
        assert_eq!(Link::new("A", "B").with_expression("   \n").usable_expression(), None);
        assert_eq!(
            Link::new("A", "B").with_expression(" destination.data.x = 1 ").usable_expression(),
            Some("destination.data.x = 1")
        );
    }

    #[test]
    fn definition_header_overrides_flow_metadata() {
        let id = Uuid::new_v4();
        let definition = FlowDefinition {
            id,
            name: "Onboarding".to_string(),
            app_id: 7,
            flow: Flow {
                name: "stale".to_string(),
                activities: vec![Activity::new("Start", "start")],
                ..Flow::default()
            },
        };

        let parsed = FlowDefinition::parse(&definition.to_json().unwrap()).unwrap();
        let flow = parsed.to_flow();
        assert_eq!(flow.id, id);
        assert_eq!(flow.name, "Onboarding");
        assert_eq!(flow.app_id, 7);
    }
}
