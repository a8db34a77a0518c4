/// Script library catalog
///
/// The catalog lists every library a script could be given, each exporting one
/// or more namespaces. It is built once per process and is immutable afterwards;
/// every call then selects the subset whose namespaces intersect the caller's
/// allowed list.

use crate::script::convert::{json_to_lua, lua_to_json};
use mlua::{Lua, LuaSerdeExt, StdLib};
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::sync::{Arc, OnceLock};

/// Installs one namespace of a library into a fresh interpreter
pub type Installer = fn(&Lua, &str) -> mlua::Result<()>;

/// A named bundle of script namespaces
#[derive(Clone)]
pub struct Library {
    /// Library name as shown in diagnostics (e.g. "host.json")
    pub name: String,
    /// Namespaces this library exports as globals
    pub namespaces: Vec<String>,
    installer: Installer,
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

impl Library {
    pub fn new(name: impl Into<String>, namespaces: &[&str], installer: Installer) -> Self {
        Self {
            name: name.into(),
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
            installer,
        }
    }

    /// True when the library exports any of the allowed namespaces
    pub fn exports_any(&self, allowed: &[String]) -> bool {
        self.namespaces.iter().any(|ns| allowed.contains(ns))
    }

    /// Install the allowed subset of this library's namespaces
    pub fn install(&self, lua: &Lua, allowed: &[String]) -> mlua::Result<()> {
        for namespace in self.namespaces.iter().filter(|ns| allowed.contains(ns)) {
            (self.installer)(lua, namespace)?;
        }
        Ok(())
    }
}

/// Immutable, process-wide registry of script libraries
#[derive(Debug, Clone)]
pub struct LibraryCatalog {
    libraries: Vec<Library>,
}

static SHARED: OnceLock<Arc<LibraryCatalog>> = OnceLock::new();

impl LibraryCatalog {
    /// Build a catalog from an explicit library list
    pub fn new(libraries: Vec<Library>) -> Self {
        Self { libraries }
    }

    /// Build the standard catalog: safe Lua standard libraries plus host modules
    pub fn discover() -> Self {
        let libraries = vec![
            Library::new("lua.core", &["math", "string", "table", "utf8"], install_std),
            Library::new("lua.coroutine", &["coroutine"], install_std),
            Library::new("host.json", &["json"], install_json),
            Library::new("host.jsonpath", &["jsonpath"], install_jsonpath),
            Library::new("host.time", &["time"], install_time),
            Library::new("host.uuid", &["uuid"], install_uuid),
        ];

        for library in &libraries {
            tracing::debug!("📚 Loaded: {} [{}]", library.name, library.namespaces.join(", "));
        }

        Self { libraries }
    }

    /// The process-wide catalog, discovered on first use
    ///
    /// Initialisation is guarded by a `OnceLock`, so concurrent first callers all
    /// observe the same fully built catalog.
    pub fn shared() -> Arc<Self> {
        SHARED.get_or_init(|| Arc::new(Self::discover())).clone()
    }

    /// Libraries that export at least one of the allowed namespaces
    pub fn select<'a>(&'a self, allowed: &'a [String]) -> impl Iterator<Item = &'a Library> + 'a {
        self.libraries.iter().filter(move |lib| lib.exports_any(allowed))
    }

    /// Every namespace known to the catalog
    pub fn namespaces(&self) -> Vec<&str> {
        self.libraries
            .iter()
            .flat_map(|lib| lib.namespaces.iter().map(String::as_str))
            .collect()
    }
}

fn install_std(lua: &Lua, namespace: &str) -> mlua::Result<()> {
    let lib = match namespace {
        "math" => StdLib::MATH,
        "string" => StdLib::STRING,
        "table" => StdLib::TABLE,
        "utf8" => StdLib::UTF8,
        "coroutine" => StdLib::COROUTINE,
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "`{}` is not a Lua standard library",
                other
            )))
        }
    };
    lua.load_std_libs(lib)
}

fn install_json(lua: &Lua, namespace: &str) -> mlua::Result<()> {
    let module = lua.create_table()?;

    module.set(
        "encode",
        lua.create_function(|lua, value: mlua::Value| {
            let json = lua_to_json(lua, value)?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        })?,
    )?;

    module.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let json: Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            json_to_lua(lua, &json)
        })?,
    )?;

    module.set("null", lua.null())?;

    lua.globals().set(namespace, module)
}

fn install_jsonpath(lua: &Lua, namespace: &str) -> mlua::Result<()> {
    let module = lua.create_table()?;

    module.set(
        "select",
        lua.create_function(|lua, (value, path): (mlua::Value, String)| {
            let json = lua_to_json(lua, value)?;
            let found = jsonpath_lib::select(&json, &path)
                .map_err(|e| mlua::Error::RuntimeError(format!("invalid JSONPath '{}': {:?}", path, e)))?;
            let list = Value::Array(found.into_iter().cloned().collect());
            json_to_lua(lua, &list)
        })?,
    )?;

    lua.globals().set(namespace, module)
}

fn install_time(lua: &Lua, namespace: &str) -> mlua::Result<()> {
    let module = lua.create_table()?;

    // Safe replacements for os.time / os.date
    module.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;
    module.set(
        "unix",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?,
    )?;
    module.set(
        "date",
        lua.create_function(|_, format: String| {
            let mut out = String::new();
            write!(out, "{}", chrono::Utc::now().format(&format))
                .map_err(|_| mlua::Error::RuntimeError(format!("invalid date format '{}'", format)))?;
            Ok(out)
        })?,
    )?;

    lua.globals().set(namespace, module)
}

fn install_uuid(lua: &Lua, namespace: &str) -> mlua::Result<()> {
    let module = lua.create_table()?;
    module.set(
        "v4",
        lua.create_function(|_, ()| Ok(uuid::Uuid::new_v4().to_string()))?,
    )?;
    lua.globals().set(namespace, module)
}
