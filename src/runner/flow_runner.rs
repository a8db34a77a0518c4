/// Request runner
///
/// Receives a start or resume request, rebuilds the flow instance through the
/// flow store, executes it and saves the snapshot. Nothing escapes: failures are
/// logged as fatal and the run always ends with "Done!".

use crate::instance::{FlowInstance, FlowInstanceData, WorkflowRequest};
use crate::runner::collaborators::{Endpoint, FlowStore, IdentityLookup};
use crate::runtime::activities::ActivityRegistry;
use crate::runtime::context::ExecutionEnv;
use crate::runtime::log::{LogLevel, LogRelay, LogSink};
use crate::script::engine::ScriptEngine;
use anyhow::Result;
use std::sync::Arc;

/// Builds the real-time sink for one request, if streaming is wanted
pub type SinkFactory = Arc<dyn Fn(&Endpoint) -> Option<Box<dyn LogSink>> + Send + Sync>;

#[derive(Clone)]
pub struct FlowRunner {
    store: Arc<dyn FlowStore>,
    identity: Arc<dyn IdentityLookup>,
    script: ScriptEngine,
    activities: Arc<ActivityRegistry>,
    imports: Vec<String>,
    sinks: Option<SinkFactory>,
}

impl std::fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRunner")
            .field("activities", &self.activities)
            .field("imports", &self.imports)
            .field("streaming", &self.sinks.is_some())
            .finish()
    }
}

impl FlowRunner {
    pub fn new(store: Arc<dyn FlowStore>, identity: Arc<dyn IdentityLookup>) -> Self {
        Self {
            store,
            identity,
            script: ScriptEngine::default(),
            activities: Arc::new(ActivityRegistry::with_builtins()),
            imports: Vec::new(),
            sinks: None,
        }
    }

    /// Namespaces scripts may import when the flow does not list its own
    pub fn with_imports(mut self, imports: Vec<String>) -> Self {
        self.imports = imports;
        self
    }

    pub fn with_activities(mut self, activities: ActivityRegistry) -> Self {
        self.activities = Arc::new(activities);
        self
    }

    pub fn with_script_engine(mut self, script: ScriptEngine) -> Self {
        self.script = script;
        self
    }

    pub fn with_log_sink(mut self, sinks: SinkFactory) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Process one request end to end
    ///
    /// Returns the saved snapshot, or None when the run was abandoned.
    pub async fn run(&self, request: WorkflowRequest) -> Option<FlowInstanceData> {
        let endpoint = request.endpoint();
        let sink = self.sinks.as_ref().and_then(|make| make(&endpoint));
        let relay = match sink {
            Some(sink) => LogRelay::new(sink),
            None => LogRelay::disabled(),
        };
        let relay = Arc::new(relay.for_instance(request.instance_id()));

        relay
            .log(LogLevel::Info, "Request received by workflow, processing ...")
            .await;
        relay
            .log(LogLevel::Debug, &format!("Request\n{}", request.to_log_string()))
            .await;

        let snapshot = match self.process(&request, &endpoint, &relay).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                relay
                    .log(
                        LogLevel::Fatal,
                        &format!("Failed to process request, abandoning execution\n{:#}", e),
                    )
                    .await;
                None
            }
        };

        relay.log(LogLevel::Info, "Done!").await;
        snapshot
    }

    async fn process(&self, request: &WorkflowRequest, endpoint: &Endpoint, relay: &Arc<LogRelay>) -> Result<FlowInstanceData> {
        let mut instance = match request {
            WorkflowRequest::Start { flow_id, .. } => {
                let definition = self.store.get_definition(endpoint, *flow_id).await?;
                relay
                    .log(LogLevel::Debug, &format!("Loaded flow definition {} ({})", definition.name, definition.id))
                    .await;
                FlowInstance::from_definition(&definition, relay).await?
            }
            WorkflowRequest::Resume { instance_id, resume_from, .. } => {
                let data = self.store.get_instance(endpoint, *instance_id).await?;
                relay
                    .log(LogLevel::Debug, &format!("Resuming instance {} at {}", data.id, resume_from))
                    .await;
                FlowInstance::from_instance_data(&data, relay).await?
            }
        };

        let env = ExecutionEnv {
            script: self.script.clone(),
            activities: Arc::clone(&self.activities),
            relay: Arc::clone(relay),
        };

        let snapshot = instance
            .execute(request, self.identity.as_ref(), &self.imports, &env)
            .await?;
        self.store.save_result(endpoint, &snapshot).await?;
        Ok(snapshot)
    }
}
