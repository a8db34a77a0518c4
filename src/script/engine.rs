/// Sandboxed Lua snippet evaluator
///
/// Every call gets a fresh interpreter holding only the namespaces the caller
/// allows, the caller's bindings, and a strict global scope: reading a name that
/// is neither bound nor imported fails like an unresolved name at compile time.

use crate::script::catalog::LibraryCatalog;
use crate::script::convert::{json_to_lua, lua_to_json, type_label};
use mlua::{Function, Lua, LuaOptions, StdLib};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Memory ceiling for a single snippet interpreter
const MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Base functions scripts must not reach
const BLOCKED_GLOBALS: &[&str] = &[
    "load",
    "dofile",
    "loadfile",
    "collectgarbage",
    "rawget",
    "rawset",
    "getmetatable",
    "setmetatable",
];

/// Lua messages for indexing or calling nil, or the JSON null sentinel
const NULL_FAILURES: [&str; 4] = [
    "attempt to index a nil value",
    "attempt to call a nil value",
    "attempt to index a userdata value",
    "attempt to call a userdata value",
];

/// Installed last, before the blocked globals are removed
const STRICT_SCOPE: &str = r#"
local unresolved = __unresolved
__unresolved = nil
setmetatable(_G, { __index = function(_, name) return unresolved(name) end, __metatable = false })
"#;

/// Failure compiling or running a snippet
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Syntax errors and unresolved names, one entry per diagnostic
    #[error("Compilation failed:\n{}", .diagnostics.join("\n"))]
    Compilation { diagnostics: Vec<String> },

    /// A nil value was indexed or called
    #[error("{message}\nTarget: {target}\n{}", .data.join("\n"))]
    NullReference {
        message: String,
        /// Chunk location and the failing member
        target: String,
        /// Names bound into the snippet and their value types
        data: Vec<String>,
    },

    #[error("script failed: {message}")]
    Runtime { message: String },

    #[error("script value conversion failed: {0}")]
    Conversion(String),

    #[error("script sandbox could not be prepared: {0}")]
    Sandbox(String),
}

#[derive(Debug, Error)]
#[error("unresolved name `{0}`")]
struct UnresolvedName(String);

/// One entry of a typed lookup table bound into a snippet
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub kind: String,
    pub value: Value,
}

/// Named bindings handed to a snippet
///
/// Plain bindings are read back after the snippet ran, so mutations of bound
/// tables are visible to the caller. Registries are bound as a table exposing
/// `get(reference, kind)`, which fails when the reference is unknown or has a
/// different kind.
#[derive(Debug, Clone, Default)]
pub struct ScriptScope {
    chunk_name: Option<String>,
    bindings: BTreeMap<String, Value>,
    registries: BTreeMap<String, BTreeMap<String, RegistryEntry>>,
}

impl ScriptScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported in diagnostics for the evaluated chunk
    pub fn named(mut self, chunk_name: impl Into<String>) -> Self {
        self.chunk_name = Some(chunk_name.into());
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn bind_registry(mut self, name: impl Into<String>, entries: BTreeMap<String, RegistryEntry>) -> Self {
        self.registries.insert(name.into(), entries);
        self
    }

    /// Current value of a plain binding
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Remove and return a plain binding
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    fn chunk_name(&self) -> &str {
        self.chunk_name.as_deref().unwrap_or("snippet")
    }

    /// Bound names with their value types, attached to null-reference failures
    fn describe(&self) -> Vec<String> {
        let plain = self
            .bindings
            .iter()
            .map(|(name, value)| format!("{}: {}", name, type_label(value)));
        let registries = self
            .registries
            .iter()
            .map(|(name, entries)| format!("{}: registry of {} entries", name, entries.len()));
        plain.chain(registries).collect()
    }
}

/// Evaluates Lua snippets against a library catalog
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    catalog: Arc<LibraryCatalog>,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(LibraryCatalog::shared())
    }
}

impl ScriptEngine {
    pub fn new(catalog: Arc<LibraryCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &LibraryCatalog {
        &self.catalog
    }

    /// Evaluate a snippet and deserialize its result
    ///
    /// Failures are returned enriched; callers treat them as fatal to the
    /// enclosing activity.
    pub fn evaluate<T: DeserializeOwned>(
        &self,
        code: &str,
        imports: &[String],
        scope: &mut ScriptScope,
    ) -> Result<T, ScriptError> {
        let value = self.run(code, imports, scope)?;
        serde_json::from_value(value).map_err(|e| ScriptError::Conversion(e.to_string()))
    }

    /// Best-effort evaluation: failures are logged and the default is returned
    pub fn try_evaluate<T: DeserializeOwned + Default>(
        &self,
        code: &str,
        imports: &[String],
        scope: &mut ScriptScope,
    ) -> T {
        match self.evaluate(code, imports, scope) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("❌ Script failed to compile or run.");
                tracing::error!("{}", e);
                if let ScriptError::Compilation { .. } = e {
                    tracing::error!("Source of the problem:\n{}", code);
                }
                T::default()
            }
        }
    }

    /// Run a side-effecting snippet, discarding any returned value
    pub fn execute(&self, code: &str, imports: &[String], scope: &mut ScriptScope) -> Result<(), ScriptError> {
        self.run(code, imports, scope).map(|_| ())
    }

    fn run(&self, code: &str, imports: &[String], scope: &mut ScriptScope) -> Result<Value, ScriptError> {
        let chunk_name = scope.chunk_name().to_string();
        tracing::debug!(
            "📜 Evaluating '{}'\nImports\n  {}\n\nLibraries Needed\n  {}",
            chunk_name,
            imports.join("\n  "),
            self.catalog
                .select(imports)
                .map(|lib| lib.name.as_str())
                .collect::<Vec<_>>()
                .join("\n  ")
        );

        let lua = self
            .sandbox(imports, scope)
            .map_err(|e| ScriptError::Sandbox(root_message(&e)))?;

        let function = compile(&lua, code, &chunk_name)?;
        let result: mlua::Value = function.call(()).map_err(|e| classify(&e, &*scope))?;

        // Read bindings back so table mutations reach the caller
        let globals = lua.globals();
        for (name, slot) in scope.bindings.iter_mut() {
            let value: mlua::Value = globals
                .raw_get(name.as_str())
                .map_err(|e| ScriptError::Conversion(root_message(&e)))?;
            *slot = lua_to_json(&lua, value).map_err(|e| ScriptError::Conversion(root_message(&e)))?;
        }

        lua_to_json(&lua, result).map_err(|e| ScriptError::Conversion(root_message(&e)))
    }

    /// Build a fresh interpreter with only the allowed namespaces and bindings
    fn sandbox(&self, imports: &[String], scope: &ScriptScope) -> mlua::Result<Lua> {
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())?;
        lua.set_memory_limit(MEMORY_LIMIT)?;

        for library in self.catalog.select(imports) {
            library.install(&lua, imports)?;
        }

        let globals = lua.globals();

        // Route print to the process log instead of stdout
        globals.set(
            "print",
            lua.create_function(|lua, args: mlua::Variadic<mlua::Value>| {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args.iter().cloned() {
                    parts.push(match lua_to_json(lua, arg)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    });
                }
                tracing::info!("📜 {}", parts.join("\t"));
                Ok(())
            })?,
        )?;

        for (name, value) in &scope.bindings {
            globals.set(name.as_str(), json_to_lua(&lua, value)?)?;
        }

        for (name, entries) in &scope.registries {
            let registry_name = name.clone();
            let entries = entries.clone();
            let get = lua.create_function(move |lua, (reference, kind): (String, String)| {
                let entry = entries.get(&reference).ok_or_else(|| {
                    mlua::Error::RuntimeError(format!("no activity `{}` in {}", reference, registry_name))
                })?;
                if entry.kind != kind {
                    return Err(mlua::Error::RuntimeError(format!(
                        "activity `{}` is of kind `{}`, not `{}`",
                        reference, entry.kind, kind
                    )));
                }
                json_to_lua(lua, &entry.value)
            })?;

            let table = lua.create_table()?;
            table.set("get", get)?;
            globals.set(name.as_str(), table)?;
        }

        globals.set(
            "__unresolved",
            lua.create_function(|_, name: String| -> mlua::Result<()> {
                Err(mlua::Error::external(UnresolvedName(name)))
            })?,
        )?;
        lua.load(STRICT_SCOPE).set_name("=sandbox").exec()?;

        for name in BLOCKED_GLOBALS {
            globals.raw_set(*name, mlua::Value::Nil)?;
        }

        Ok(lua)
    }
}

/// Compile a snippet, accepting both expressions and statement blocks
fn compile(lua: &Lua, code: &str, chunk_name: &str) -> Result<Function, ScriptError> {
    let name = format!("={}", chunk_name);
    if let Ok(function) = lua.load(format!("return {}", code)).set_name(name.clone()).into_function() {
        return Ok(function);
    }

    lua.load(code).set_name(name).into_function().map_err(|e| match e {
        mlua::Error::SyntaxError { message, .. } => ScriptError::Compilation {
            diagnostics: message.lines().map(str::to_string).collect(),
        },
        other => ScriptError::Compilation {
            diagnostics: vec![root_message(&other)],
        },
    })
}

/// Map a run-time failure onto the script error taxonomy
fn classify(error: &mlua::Error, scope: &ScriptScope) -> ScriptError {
    if let Some(name) = unresolved_name(error) {
        return ScriptError::Compilation {
            diagnostics: vec![format!(
                "{}: unresolved name `{}`: namespace not imported or variable not bound",
                scope.chunk_name(),
                name
            )],
        };
    }

    let message = root_message(error);
    let headline = message.lines().next().unwrap_or_default().to_string();

    if NULL_FAILURES.iter().any(|failure| headline.contains(failure)) {
        return ScriptError::NullReference {
            target: call_site(&headline, scope.chunk_name()),
            message: headline,
            data: scope.describe(),
        };
    }

    ScriptError::Runtime { message }
}

fn unresolved_name(error: &mlua::Error) -> Option<String> {
    match error {
        mlua::Error::CallbackError { cause, .. } => unresolved_name(cause),
        mlua::Error::WithContext { cause, .. } => unresolved_name(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<UnresolvedName>().map(|u| u.0.clone()),
        _ => None,
    }
}

/// Innermost message of an error, skipping callback wrappers
fn root_message(error: &mlua::Error) -> String {
    match error {
        mlua::Error::CallbackError { cause, .. } => root_message(cause),
        mlua::Error::WithContext { context, cause } => format!("{}: {}", context, root_message(cause)),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// "chunk:line -> member" from a Lua error headline
///
/// `transfer:B:3: attempt to index a nil value (field 'data')` yields
/// `transfer:B:3 -> field 'data'`.
fn call_site(headline: &str, chunk_name: &str) -> String {
    let location = location_prefix(headline).unwrap_or(chunk_name);
    let member = headline
        .rfind('(')
        .and_then(|start| headline[start + 1..].strip_suffix(')'))
        .unwrap_or("unknown member");
    format!("{} -> {}", location, member)
}

/// Everything before the first ":<line>:" marker
fn location_prefix(headline: &str) -> Option<&str> {
    let bytes = headline.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        let digits = bytes[i + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && bytes.get(i + 1 + digits) == Some(&b':') {
            return Some(&headline[..i + 1 + digits]);
        }
    }
    None
}
