/// Flow instance façade
///
/// Wraps a stitched flow with identity and timing metadata. Built either from a
/// flow definition (fresh run) or from a persisted snapshot (resume); executing
/// it produces the next snapshot.

use crate::flow::stitch::{stitch, FlowGraph};
use crate::flow::types::{Flow, FlowDefinition, FlowError};
use crate::instance::request::WorkflowRequest;
use crate::runner::collaborators::{Identity, IdentityLookup};
use crate::runtime::context::{Entry, ExecutionContext, ExecutionEnv, ExecutionState, Seed};
use crate::runtime::log::{LogLevel, LogRelay};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable snapshot of an execution attempt
///
/// The only state that crosses process boundaries; it fully determines how a
/// suspended run resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInstanceData {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub caller: Option<Identity>,
    pub flow_definition_id: Uuid,
    /// Serialized execution context: flow, variables, log and state
    pub context: String,
    pub execution_state: ExecutionState,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FlowInstanceData {
    /// Deserialize the stored execution context
    pub fn execution_context(&self) -> Result<ExecutionContext, FlowError> {
        Ok(serde_json::from_str(&self.context)?)
    }
}

#[derive(Debug, Clone)]
pub struct FlowInstance {
    pub id: Uuid,
    pub name: String,
    /// Resolved during execution, not before
    pub caller: Option<Identity>,
    /// Serialized definition the flow was built from
    pub definition: String,
    pub flow: Flow,
    /// Context of the latest execution attempt
    pub context: Option<ExecutionContext>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FlowInstance {
    /// Build a fresh instance from a flow definition
    pub async fn from_definition(definition: &FlowDefinition, relay: &LogRelay) -> Result<Self, FlowError> {
        let mut flow = definition.to_flow();
        report_stitching(&mut flow, relay).await;

        Ok(Self {
            id: Uuid::nil(),
            name: definition.name.clone(),
            caller: None,
            definition: definition.to_json()?,
            flow,
            context: None,
            start: None,
            end: None,
        })
    }

    /// Rehydrate a suspended instance from its snapshot
    pub async fn from_instance_data(data: &FlowInstanceData, relay: &LogRelay) -> Result<Self, FlowError> {
        let context = data.execution_context()?;
        let mut flow = context.flow.clone();
        report_stitching(&mut flow, relay).await;

        let definition = FlowDefinition {
            id: data.flow_definition_id,
            name: data.name.clone(),
            app_id: flow.app_id,
            flow: flow.clone(),
        };

        Ok(Self {
            id: data.id,
            name: data.name.clone(),
            caller: data.caller.clone(),
            definition: definition.to_json()?,
            flow,
            context: Some(context),
            start: data.start,
            end: None,
        })
    }

    /// Run one execution attempt and return its snapshot
    ///
    /// Errors here happen before traversal (unknown resume point, identity
    /// lookup); traversal failures are part of the returned snapshot.
    pub async fn execute(
        &mut self,
        request: &WorkflowRequest,
        identity: &dyn IdentityLookup,
        imports: &[String],
        env: &ExecutionEnv,
    ) -> Result<FlowInstanceData> {
        let entry = request.entry();
        if let Entry::Resume(reference) = &entry {
            if self.flow.activity(reference).is_none() {
                return Err(FlowError::ResumePointNotFound(reference.clone()).into());
            }
        }

        self.start = Some(Utc::now());
        self.id = request.instance_id();

        let mut context = ExecutionContext::new(self.flow.clone());
        if let Some(notice) = env.relay.take_notice() {
            context.log.push(LogLevel::Warning, &notice);
        }
        context.seed(&Seed {
            app_id: self.flow.app_id,
            data: request.payload().to_value(),
            api: request.endpoint().api,
            auth_token: request.auth_token().map(str::to_string),
            instance_id: self.id,
            imports: self.flow.imports.clone().unwrap_or_else(|| imports.to_vec()),
        });

        let caller = identity
            .who_am_i(&request.endpoint())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to resolve caller identity: {:#}", e))?;
        context.set_caller(&caller.id, &caller.display_name, &caller.email);
        self.caller = Some(caller);

        context
            .record(&env.relay, LogLevel::Info, format!("Executing flow {} as instance {}", self.name, self.id))
            .await;
        if let Entry::Resume(reference) = &entry {
            let downstream: Vec<String> = FlowGraph::build(&self.flow).downstream(reference).into_iter().collect();
            let reach = if downstream.is_empty() { "nothing else".to_string() } else { downstream.join(", ") };
            context
                .record(
                    &env.relay,
                    LogLevel::Debug,
                    format!("Resuming at {}; this attempt may reach {}", reference, reach),
                )
                .await;
        }
        context.execute(&entry, env).await;

        self.flow = context.flow.clone();
        self.context = Some(context);
        self.end = Some(Utc::now());
        self.snapshot()
    }

    /// Durable form of the latest attempt
    pub fn snapshot(&self) -> Result<FlowInstanceData> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Flow instance {} has not been executed", self.id))?;

        Ok(FlowInstanceData {
            id: self.id,
            name: self.name.clone(),
            caller: self.caller.clone(),
            flow_definition_id: FlowDefinition::parse(&self.definition)?.id,
            context: serde_json::to_string(context)?,
            execution_state: context.state,
            start: self.start,
            end: self.end,
        })
    }
}

/// Stitch the flow and relay every per-activity problem
async fn report_stitching(flow: &mut Flow, relay: &LogRelay) {
    for issue in stitch(flow) {
        relay.log(LogLevel::Error, &issue.to_string()).await;
    }
}
