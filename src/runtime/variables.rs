/// Execution variable bag
///
/// String-keyed JSON values seeded before traversal and visible to every script
/// as `variables`. Reads go through typed accessors that fail explicitly instead
/// of silently coercing.

use crate::script::convert::type_label;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const APP_ID: &str = "app_id";
pub const DATA: &str = "data";
pub const API: &str = "api";
pub const AUTH_TOKEN: &str = "auth_token";
pub const INSTANCE_ID: &str = "instance_id";
pub const IMPORTS: &str = "imports";
pub const USER_ID: &str = "user_id";
pub const USER_NAME: &str = "user_name";
pub const USER_EMAIL: &str = "user_email";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariableError {
    #[error("variable `{0}` is not set")]
    Missing(String),

    #[error("variable `{name}` holds a {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableBag {
    values: BTreeMap<String, Value>,
}

impl VariableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text(&self, name: &str) -> Result<&str, VariableError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "string", value))
    }

    pub fn integer(&self, name: &str) -> Result<i64, VariableError> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, "integer", value))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, VariableError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "boolean", value))
    }

    pub fn record(&self, name: &str) -> Result<&Map<String, Value>, VariableError> {
        let value = self.require(name)?;
        value.as_object().ok_or_else(|| mismatch(name, "record", value))
    }

    pub fn list(&self, name: &str) -> Result<&[Value], VariableError> {
        let value = self.require(name)?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| mismatch(name, "list", value))
    }

    /// A list whose every element is a string
    pub fn string_list(&self, name: &str) -> Result<Vec<String>, VariableError> {
        let items = self.list(name)?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| mismatch(name, "list of strings", item))
            })
            .collect()
    }

    /// JSON object view handed to scripts
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Replace the bag's content with a script's view of it
    ///
    /// Anything other than a record leaves the bag unchanged.
    pub fn absorb(&mut self, value: Value) {
        if let Value::Object(fields) = value {
            self.values = fields.into_iter().collect();
        }
    }

    fn require(&self, name: &str) -> Result<&Value, VariableError> {
        self.values
            .get(name)
            .ok_or_else(|| VariableError::Missing(name.to_string()))
    }
}

fn mismatch(name: &str, expected: &'static str, found: &Value) -> VariableError {
    VariableError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: type_label(found),
    }
}
