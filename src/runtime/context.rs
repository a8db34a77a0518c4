/// Execution context: traversal and terminal-state classification
///
/// One context per execution attempt. It seeds the variable bag, walks the
/// stitched graph from the start activity (or the resume point), releases fan-in
/// activities only once every predecessor is Complete, and classifies the run as
/// Complete, Suspended or Failed.

use crate::flow::types::{Activity, ActivityState, Flow};
use crate::runtime::activities::{ActivityError, ActivityOutcome, ActivityRegistry, HandlerContext};
use crate::runtime::log::{ExecutionLog, LogLevel, LogRelay};
use crate::runtime::variables::{self, VariableBag};
use crate::script::engine::ScriptEngine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as _;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Kind that marks the designated start activity
pub const START_KIND: &str = "start";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    #[default]
    Pending,
    Running,
    Suspended,
    Complete,
    Failed,
}

impl ExecutionState {
    /// One-line notice logged when traversal returns
    pub fn notice(self) -> &'static str {
        match self {
            ExecutionState::Complete => "Execution Complete.",
            ExecutionState::Suspended => "Execution awaiting further input.",
            ExecutionState::Failed => "Execution failed.",
            ExecutionState::Pending | ExecutionState::Running => "Execution has not finished.",
        }
    }
}

#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("flow `{0}` has no start activity")]
    MissingStart(String),

    #[error("flow `{flow}` has {count} start activities, expected exactly one")]
    AmbiguousStart { flow: String, count: usize },

    #[error("activity `{0}` is not part of the flow")]
    UnknownActivity(String),

    #[error("activity `{reference}` failed: {source}")]
    Activity {
        reference: String,
        #[source]
        source: ActivityError,
    },
}

/// Where traversal begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// From the unique start activity
    Fresh,
    /// Directly at a previously suspended activity
    Resume(String),
}

/// Values placed in the variable bag before traversal
#[derive(Debug, Clone, Default)]
pub struct Seed {
    pub app_id: i64,
    pub data: Value,
    pub api: String,
    pub auth_token: Option<String>,
    pub instance_id: Uuid,
    pub imports: Vec<String>,
}

/// Shared capabilities of one execution attempt
#[derive(Debug, Clone)]
pub struct ExecutionEnv {
    pub script: ScriptEngine,
    pub activities: Arc<ActivityRegistry>,
    pub relay: Arc<LogRelay>,
}

/// Run-time state of one execution attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub flow: Flow,
    pub variables: VariableBag,
    pub log: ExecutionLog,
    pub state: ExecutionState,
}

impl ExecutionContext {
    /// Fresh context over a stitched flow
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            variables: VariableBag::new(),
            log: ExecutionLog::new(),
            state: ExecutionState::Pending,
        }
    }

    /// Seed the variable bag with the request's identifiers and payload
    pub fn seed(&mut self, seed: &Seed) {
        self.variables.set(variables::APP_ID, seed.app_id);
        self.variables.set(variables::DATA, seed.data.clone());
        self.variables.set(variables::API, seed.api.clone());
        self.variables
            .set(variables::AUTH_TOKEN, seed.auth_token.clone().map_or(Value::Null, Value::String));
        self.variables.set(variables::INSTANCE_ID, seed.instance_id.to_string());
        self.variables.set(variables::IMPORTS, seed.imports.clone());
    }

    /// Add the resolved caller to the variable bag
    pub fn set_caller(&mut self, id: &str, name: &str, email: &str) {
        self.variables.set(variables::USER_ID, id);
        self.variables.set(variables::USER_NAME, name);
        self.variables.set(variables::USER_EMAIL, email);
    }

    /// Append to the durable log, mirror to tracing and push to the sink
    ///
    /// When the push disables the sink, its notice is appended once as a warning.
    pub async fn record(&mut self, relay: &LogRelay, level: LogLevel, message: impl AsRef<str>) {
        let stored = self.log.push(level, message.as_ref()).to_string();
        level.trace(&stored);
        if let Some(notice) = relay.emit(level, &stored).await {
            self.log.push(LogLevel::Warning, &notice);
        }
    }

    /// Traverse from the entry point and classify the outcome
    ///
    /// Errors never escape: they are logged and turn the state into Failed.
    pub async fn execute(&mut self, entry: &Entry, env: &ExecutionEnv) -> ExecutionState {
        self.state = ExecutionState::Running;
        self.record(&env.relay, LogLevel::Info, "Execution started").await;
        let data = self.variables.get(variables::DATA).cloned().unwrap_or(Value::Null);
        let auth_token = self.variables.text(variables::AUTH_TOKEN).ok().map(str::to_string);

        let outcome = match self.entry_point(entry) {
            Ok(reference) => {
                if let Some(activity) = self.activity_mut(&reference) {
                    activity.data = data;
                    activity.auth_token = auth_token;
                }
                let resume_point = matches!(entry, Entry::Resume(_)).then(|| reference.clone());
                self.traverse(reference, resume_point.as_deref(), env).await
            }
            Err(e) => Err(e),
        };

        self.state = match outcome {
            Ok(()) if self.flow.all_complete() => ExecutionState::Complete,
            Ok(()) => ExecutionState::Suspended,
            Err(e) => {
                self.record_failure(&e, &env.relay).await;
                ExecutionState::Failed
            }
        };

        let notice = self.state.notice();
        self.record(&env.relay, LogLevel::Info, notice).await;
        self.state
    }

    fn entry_point(&self, entry: &Entry) -> Result<String, TraversalError> {
        match entry {
            Entry::Fresh => {
                let starts: Vec<&Activity> = self.flow.activities.iter().filter(|a| a.kind == START_KIND).collect();
                match starts.as_slice() {
                    [start] => Ok(start.reference.clone()),
                    [] => Err(TraversalError::MissingStart(self.flow.name.clone())),
                    many => Err(TraversalError::AmbiguousStart {
                        flow: self.flow.name.clone(),
                        count: many.len(),
                    }),
                }
            }
            Entry::Resume(reference) => self
                .flow
                .activity(reference)
                .map(|a| a.reference.clone())
                .ok_or_else(|| TraversalError::UnknownActivity(reference.clone())),
        }
    }

    /// Depth-first walk along `next`, one activity at a time
    async fn traverse(&mut self, first: String, resume_point: Option<&str>, env: &ExecutionEnv) -> Result<(), TraversalError> {
        let imports = self.variables.string_list(variables::IMPORTS).unwrap_or_default();
        let mut pending = vec![first];

        while let Some(reference) = pending.pop() {
            let index = self
                .flow
                .position(&reference)
                .ok_or_else(|| TraversalError::UnknownActivity(reference.clone()))?;
            if self.flow.activities[index].is_complete() && resume_point != Some(reference.as_str()) {
                continue;
            }

            self.flow.activities[index].state = ActivityState::Running;
            let mut activity = self.flow.activities[index].clone();
            self.record(
                &env.relay,
                LogLevel::Debug,
                format!("Executing activity {} ({})", activity.reference, activity.kind),
            )
            .await;

            let resumed = resume_point == Some(reference.as_str());
            let (result, messages) = {
                let mut ctx = HandlerContext::new(&env.script, &mut self.variables, &self.flow, &imports, resumed);
                let result = run_activity(&mut activity, &mut ctx, &env.activities).await;
                (result, ctx.take_messages())
            };
            for (level, message) in messages {
                self.record(&env.relay, level, message).await;
            }

            match result {
                Ok(ActivityOutcome::Complete) => {
                    activity.state = ActivityState::Complete;
                    let next = activity.next.clone();
                    self.flow.activities[index] = activity;
                    self.record(&env.relay, LogLevel::Debug, format!("Activity {} complete", reference))
                        .await;

                    let ready: Vec<String> = next
                        .into_iter()
                        .filter(|n| !pending.contains(n) && self.is_ready(n))
                        .collect();
                    pending.extend(ready.into_iter().rev());
                }
                Ok(ActivityOutcome::Suspend) => {
                    activity.state = ActivityState::Suspended;
                    self.flow.activities[index] = activity;
                    self.record(&env.relay, LogLevel::Info, format!("Activity {} suspended", reference))
                        .await;
                }
                Err(source) => {
                    activity.state = ActivityState::Failed;
                    self.flow.activities[index] = activity;
                    return Err(TraversalError::Activity { reference, source });
                }
            }
        }

        Ok(())
    }

    /// Join rule: not yet complete and every predecessor is Complete
    fn is_ready(&self, reference: &str) -> bool {
        let Some(activity) = self.flow.activity(reference) else {
            return false;
        };
        !activity.is_complete()
            && activity
                .previous
                .iter()
                .all(|p| self.flow.activity(p).is_some_and(Activity::is_complete))
    }

    fn activity_mut(&mut self, reference: &str) -> Option<&mut Activity> {
        self.flow.activities.iter_mut().find(|a| a.reference == reference)
    }

    /// Log a traversal failure
    ///
    /// The durable log repeats the top-level message once per link of the cause
    /// chain; the process log gets every nested message.
    async fn record_failure(&mut self, error: &TraversalError, relay: &LogRelay) {
        let mut chain = vec![error.to_string()];
        let mut cause = error.source();
        while let Some(inner) = cause {
            chain.push(inner.to_string());
            cause = inner.source();
        }
        tracing::error!("❌ Traversal failed: {}", chain.join("\n  caused by: "));

        let top = error.to_string();
        for _ in 0..chain.len() {
            self.record(relay, LogLevel::Error, &top).await;
        }
    }
}

async fn run_activity(
    activity: &mut Activity,
    ctx: &mut HandlerContext<'_>,
    registry: &ActivityRegistry,
) -> Result<ActivityOutcome, ActivityError> {
    let handler = registry
        .get(&activity.kind)
        .ok_or_else(|| ActivityError::UnknownKind(activity.kind.clone()))?;
    ctx.transfer(activity)?;
    handler.run(activity, ctx).await
}
