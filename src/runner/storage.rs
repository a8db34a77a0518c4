/// SQLite flow store
///
/// Keeps flow definitions and instance snapshots in a local SQLite database.
/// Both are stored as JSON next to a few indexed lookup columns. The request
/// endpoint is ignored: everything lives in the one database.

use crate::flow::types::FlowDefinition;
use crate::instance::FlowInstanceData;
use crate::runner::collaborators::{Endpoint, FlowStore};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    ///
    /// In-memory databases are limited to a single, never-recycled connection so
    /// every query sees the same database.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| anyhow::anyhow!("Invalid database URL '{}': {}", url, e))?
            .create_if_missing(true);

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };

        tracing::info!("🗄️ Opened flow store: {}", url);
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables; safe to call multiple times
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                app_id INTEGER NOT NULL,
                definition JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_instances (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                flow_definition_id TEXT NOT NULL,
                execution_state TEXT NOT NULL,
                data JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_flow_instances_definition
            ON flow_instances(flow_definition_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new definition or replace an existing one
    pub async fn save_definition(&self, definition: &FlowDefinition) -> Result<()> {
        let definition_json = definition.to_json()?;

        sqlx::query(
            r#"
            INSERT INTO flow_definitions (id, name, app_id, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                app_id = excluded.app_id,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(definition.id.to_string())
        .bind(&definition.name)
        .bind(definition.app_id)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Stored flow definition {} ({})", definition.name, definition.id);
        Ok(())
    }

    /// Snapshots of every run of one definition
    pub async fn list_instances(&self, flow_definition_id: Uuid) -> Result<Vec<FlowInstanceData>> {
        let rows = sqlx::query("SELECT data FROM flow_instances WHERE flow_definition_id = ? ORDER BY updated_at")
            .bind(flow_definition_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let data_json: String = row.get("data");
            instances.push(serde_json::from_str(&data_json)?);
        }
        Ok(instances)
    }
}

#[async_trait]
impl FlowStore for SqliteStore {
    async fn get_definition(&self, _endpoint: &Endpoint, flow_id: Uuid) -> Result<FlowDefinition> {
        let row = sqlx::query("SELECT definition FROM flow_definitions WHERE id = ?")
            .bind(flow_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Flow definition not found: {}", flow_id))?;

        let definition_json: String = row.get("definition");
        Ok(FlowDefinition::parse(&definition_json)?)
    }

    async fn get_instance(&self, _endpoint: &Endpoint, instance_id: Uuid) -> Result<FlowInstanceData> {
        let row = sqlx::query("SELECT data FROM flow_instances WHERE id = ?")
            .bind(instance_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Flow instance not found: {}", instance_id))?;

        let data_json: String = row.get("data");
        Ok(serde_json::from_str(&data_json)?)
    }

    async fn save_result(&self, _endpoint: &Endpoint, data: &FlowInstanceData) -> Result<()> {
        let data_json = serde_json::to_string(data)?;
        let state = serde_json::to_value(data.execution_state)?;

        sqlx::query(
            r#"
            INSERT INTO flow_instances (id, name, flow_definition_id, execution_state, data, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                flow_definition_id = excluded.flow_definition_id,
                execution_state = excluded.execution_state,
                data = excluded.data,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(data.id.to_string())
        .bind(&data.name)
        .bind(data.flow_definition_id.to_string())
        .bind(state.as_str().unwrap_or_default())
        .bind(&data_json)
        .execute(&self.pool)
        .await?;

        tracing::info!("💾 Saved instance {} ({:?})", data.id, data.execution_state);
        Ok(())
    }
}
