/// Pluggable activity kinds
///
/// The execution context owns the common contract of every activity (state
/// transitions, data transfer, releasing successors). A handler only performs
/// the effect of its kind and reports whether the activity completed or is
/// waiting for external input.

use crate::flow::types::{Activity, Flow};
use crate::runtime::log::LogLevel;
use crate::runtime::variables::{VariableBag, VariableError};
use crate::script::engine::{RegistryEntry, ScriptEngine, ScriptError, ScriptScope};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Name of the registry binding through which scripts reach other activities
pub const FLOW_BINDING: &str = "flow";
pub const ACTIVITY_BINDING: &str = "activity";
pub const VARIABLES_BINDING: &str = "variables";

/// What a handler did with its activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Done; successors may be released
    Complete,
    /// Waiting for external input; traversal stops on this branch
    Suspend,
}

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("link data transfer failed: {0}")]
    Transfer(#[source] ScriptError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error("no handler registered for activity kind `{0}`")]
    UnknownKind(String),

    #[error("invalid activity configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything a handler may touch besides its own activity
pub struct HandlerContext<'a> {
    pub script: &'a ScriptEngine,
    pub variables: &'a mut VariableBag,
    /// The flow as it stood when the activity started
    pub flow: &'a Flow,
    /// Namespaces scripts of this run may import
    pub imports: &'a [String],
    /// True when the activity is the resume point of this run
    pub resumed: bool,
    messages: Vec<(LogLevel, String)>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        script: &'a ScriptEngine,
        variables: &'a mut VariableBag,
        flow: &'a Flow,
        imports: &'a [String],
        resumed: bool,
    ) -> Self {
        Self {
            script,
            variables,
            flow,
            imports,
            resumed,
            messages: Vec::new(),
        }
    }

    /// Queue a line for the execution log
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.messages.push((level, message.into()));
    }

    pub fn take_messages(&mut self) -> Vec<(LogLevel, String)> {
        std::mem::take(&mut self.messages)
    }

    /// Script bindings for `activity`: itself, the variables and the flow registry
    pub fn scope(&self, activity: &Activity) -> ScriptScope {
        ScriptScope::new()
            .named(format!("{}:{}", activity.kind, activity.reference))
            .bind(ACTIVITY_BINDING, activity.to_script_value())
            .bind(VARIABLES_BINDING, self.variables.to_value())
            .bind_registry(FLOW_BINDING, flow_registry(self.flow))
    }

    /// Copy script-side mutations of the activity data and variables back
    pub fn absorb(&mut self, activity: &mut Activity, scope: &mut ScriptScope) {
        if let Some(Value::Object(mut view)) = scope.take(ACTIVITY_BINDING) {
            if let Some(data) = view.remove("data") {
                activity.data = data;
            }
        }
        if let Some(variables) = scope.take(VARIABLES_BINDING) {
            self.variables.absorb(variables);
        }
    }

    /// Run the activity's stitched transfer code, if any
    pub fn transfer(&mut self, activity: &mut Activity) -> Result<(), ActivityError> {
        let Some(code) = activity.assign_code.as_deref() else {
            return Ok(());
        };

        let call = format!("({})({}, {}, {})", code, ACTIVITY_BINDING, VARIABLES_BINDING, FLOW_BINDING);
        let mut scope = self.scope(activity).named(format!("transfer:{}", activity.reference));
        self.script
            .execute(&call, self.imports, &mut scope)
            .map_err(ActivityError::Transfer)?;
        self.absorb(activity, &mut scope);
        Ok(())
    }
}

/// Typed lookup table of every activity, keyed by reference
pub fn flow_registry(flow: &Flow) -> BTreeMap<String, RegistryEntry> {
    flow.activities
        .iter()
        .map(|a| {
            (
                a.reference.clone(),
                RegistryEntry {
                    kind: a.kind.clone(),
                    value: a.to_script_value(),
                },
            )
        })
        .collect()
}

/// Effect of one activity kind
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn run(&self, activity: &mut Activity, ctx: &mut HandlerContext<'_>) -> Result<ActivityOutcome, ActivityError>;
}

/// Handlers by activity kind
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in kinds: start, pass, script, log, form
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("start", PassActivity);
        registry.register("pass", PassActivity);
        registry.register("script", ScriptActivity);
        registry.register("log", LogActivity);
        registry.register("form", FormActivity);
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: impl ActivityHandler + 'static) {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Completes without effect; also serves the start kind
#[derive(Debug, Clone, Copy)]
pub struct PassActivity;

#[async_trait]
impl ActivityHandler for PassActivity {
    async fn run(&self, _activity: &mut Activity, _ctx: &mut HandlerContext<'_>) -> Result<ActivityOutcome, ActivityError> {
        Ok(ActivityOutcome::Complete)
    }
}

/// Runs `config.code`; a non-null return value lands in `data.result`
#[derive(Debug, Clone, Copy)]
pub struct ScriptActivity;

#[async_trait]
impl ActivityHandler for ScriptActivity {
    async fn run(&self, activity: &mut Activity, ctx: &mut HandlerContext<'_>) -> Result<ActivityOutcome, ActivityError> {
        let code = activity
            .config
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ActivityError::Config(format!("script activity `{}` has no `code`", activity.reference)))?
            .to_string();

        let mut scope = ctx.scope(activity);
        let result: Value = ctx.script.evaluate(&code, ctx.imports, &mut scope)?;
        ctx.absorb(activity, &mut scope);

        if !result.is_null() {
            match activity.data.as_object_mut() {
                Some(data) => {
                    data.insert("result".to_string(), result);
                }
                None => activity.data = serde_json::json!({ "result": result }),
            }
        }

        Ok(ActivityOutcome::Complete)
    }
}

/// Best-effort: evaluates `config.message` and writes it to the execution log
#[derive(Debug, Clone, Copy)]
pub struct LogActivity;

#[async_trait]
impl ActivityHandler for LogActivity {
    async fn run(&self, activity: &mut Activity, ctx: &mut HandlerContext<'_>) -> Result<ActivityOutcome, ActivityError> {
        let code = activity
            .config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("nil")
            .to_string();
        let level = activity
            .config
            .get("level")
            .cloned()
            .and_then(|level| serde_json::from_value(level).ok())
            .unwrap_or(LogLevel::Info);

        let mut scope = ctx.scope(activity);
        let message: Value = ctx.script.try_evaluate(&code, ctx.imports, &mut scope);
        let message = match message {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        ctx.log(level, message);
        Ok(ActivityOutcome::Complete)
    }
}

/// Waits for input; completes when the run resumes at it
#[derive(Debug, Clone, Copy)]
pub struct FormActivity;

#[async_trait]
impl ActivityHandler for FormActivity {
    async fn run(&self, activity: &mut Activity, ctx: &mut HandlerContext<'_>) -> Result<ActivityOutcome, ActivityError> {
        if ctx.resumed {
            return Ok(ActivityOutcome::Complete);
        }
        ctx.log(LogLevel::Info, format!("Activity {} is awaiting input.", activity.reference));
        Ok(ActivityOutcome::Suspend)
    }
}
