/// Configuration management for the stitchflow engine
///
/// Handles server binding, the optional local flow store, script imports and the
/// identity used when running against that store.

use serde::{Deserialize, Serialize};

/// Namespaces scripts may import unless a flow lists its own
pub const DEFAULT_IMPORTS: &str = "math,string,table,utf8,json,time";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Flow store configuration
    pub store: StoreConfig,
    /// Script and log streaming settings
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Where definitions and instances come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL (e.g. "sqlite://flows.db"); when unset the caller's API is used
    pub database_url: Option<String>,
    /// Identity reported for runs against the local store
    pub caller_id: String,
    pub caller_name: String,
    pub caller_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default allowed script namespaces
    pub imports: Vec<String>,
    /// Push log events to the caller's workflow hub
    pub stream_logs: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("STITCHFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("STITCHFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            store: StoreConfig {
                database_url: std::env::var("STITCHFLOW_DATABASE_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                caller_id: std::env::var("STITCHFLOW_CALLER_ID").unwrap_or_else(|_| "0".to_string()),
                caller_name: std::env::var("STITCHFLOW_CALLER_NAME").unwrap_or_else(|_| "stitchflow".to_string()),
                caller_email: std::env::var("STITCHFLOW_CALLER_EMAIL").unwrap_or_default(),
            },
            engine: EngineConfig {
                imports: parse_imports(
                    &std::env::var("STITCHFLOW_IMPORTS").unwrap_or_else(|_| DEFAULT_IMPORTS.to_string()),
                ),
                stream_logs: std::env::var("STITCHFLOW_STREAM_LOGS")
                    .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                    .unwrap_or(true),
            },
        }
    }
}

/// Split a comma separated namespace list, dropping blanks
pub fn parse_imports(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn imports_are_trimmed_and_blanks_dropped() {
        assert_eq!(parse_imports(" math, json ,,time "), vec!["math", "json", "time"]);
        assert_eq!(parse_imports(DEFAULT_IMPORTS).len(), 6);
    }
}
