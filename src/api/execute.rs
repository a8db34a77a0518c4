/// Execution endpoints
///
/// Accepts start and resume requests. `POST /execute` hands the request to the
/// runner in the background and answers immediately; `POST /execute/wait` runs
/// it inline and returns the saved snapshot.

use crate::instance::WorkflowRequest;
use crate::runner::FlowRunner;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Runner shared by every request
    pub runner: Arc<FlowRunner>,
}

/// Response for an accepted request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub instance_id: Uuid,
    pub message: String,
}

/// Create execution routes
pub fn create_execute_routes() -> Router<AppState> {
    Router::new()
        .route("/execute", post(execute))
        .route("/execute/wait", post(execute_and_wait))
}

fn parse_request(body: &str) -> Result<WorkflowRequest, StatusCode> {
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!("❌ Invalid execution request: {}", e);
        StatusCode::BAD_REQUEST
    })
}

/// POST /execute
///
/// Body: a start (`flowId`) or resume (`resumeFrom`) request.
async fn execute(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<ExecuteResponse>), StatusCode> {
    let request = parse_request(&body)?;
    let instance_id = request.instance_id();
    tracing::info!("📥 Execution request received for instance {}", instance_id);

    let runner = Arc::clone(&state.runner);
    tokio::spawn(async move {
        runner.run(request).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            instance_id,
            message: "Request accepted for processing".to_string(),
        }),
    ))
}

/// POST /execute/wait
///
/// Same body as `/execute`; replies with the snapshot, or 500 when the run was
/// abandoned before producing one.
async fn execute_and_wait(State(state): State<AppState>, body: String) -> Result<Json<Value>, StatusCode> {
    let request = parse_request(&body)?;
    tracing::info!("📥 Blocking execution request for instance {}", request.instance_id());

    let snapshot = state
        .runner
        .run(request)
        .await
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    serde_json::to_value(snapshot)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
