/// Server setup and initialization
///
/// Wires together the flow store, identity lookup, script catalog and runner,
/// and exposes them through the axum router.

use crate::{
    api::{create_execute_routes, AppState},
    config::Config,
    runner::{
        collaborators::{Endpoint, FlowStore, Identity, IdentityLookup, StaticIdentity},
        http::{HttpApi, HttpLogSink},
        storage::SqliteStore,
        FlowRunner,
    },
    runtime::log::LogSink,
    script::{LibraryCatalog, ScriptEngine},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the runner described by the configuration
///
/// With a database URL definitions and instances live in local SQLite and the
/// caller identity is fixed; otherwise every request talks to its own API.
pub async fn create_runner(config: &Config) -> Result<FlowRunner> {
    let client = reqwest::Client::new();

    let (store, identity): (Arc<dyn FlowStore>, Arc<dyn IdentityLookup>) = match &config.store.database_url {
        Some(url) => {
            tracing::info!("🗄️ Using local flow store");
            let store = SqliteStore::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open flow store: {}", e))?;
            let identity = StaticIdentity(Identity {
                id: config.store.caller_id.clone(),
                display_name: config.store.caller_name.clone(),
                email: config.store.caller_email.clone(),
            });
            let store: Arc<dyn FlowStore> = Arc::new(store);
            let identity: Arc<dyn IdentityLookup> = Arc::new(identity);
            (store, identity)
        }
        None => {
            tracing::info!("🌐 Using per-request API collaborators");
            let api = Arc::new(HttpApi::new(client.clone()));
            let store: Arc<dyn FlowStore> = api.clone();
            let identity: Arc<dyn IdentityLookup> = api;
            (store, identity)
        }
    };

    tracing::info!("📚 Loading script library catalog");
    let catalog = LibraryCatalog::shared();
    tracing::info!("📚 Script namespaces available: {}", catalog.namespaces().join(", "));

    let mut runner = FlowRunner::new(store, identity)
        .with_script_engine(ScriptEngine::new(catalog))
        .with_imports(config.engine.imports.clone());

    if config.engine.stream_logs {
        tracing::info!("📡 Real-time log streaming enabled");
        runner = runner.with_log_sink(Arc::new(move |endpoint: &Endpoint| {
            if endpoint.api.is_empty() {
                return None;
            }
            let sink: Box<dyn LogSink> = Box::new(HttpLogSink::new(client.clone(), endpoint.clone()));
            Some(sink)
        }));
    }

    Ok(runner)
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🚀 Initializing flow runner");
    let runner = create_runner(&config).await?;

    let app_state = AppState {
        runner: Arc::new(runner),
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_execute_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting stitchflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
