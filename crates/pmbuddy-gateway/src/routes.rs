use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use pmbuddy_agent::WorkflowRunResult;

use crate::state::AppState;

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workflow": state.workflow.name(),
        "bind": state.config.bind_addr(),
    }))
}

// GET /v1/entities
pub async fn list_entities(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let description = state.workflow.describe();
    Json(serde_json::json!({
        "entities": [{
            "id": description.name,
            "type": "workflow",
            "description": description,
        }]
    }))
}

#[derive(Deserialize)]
pub struct RunBody {
    pub input: String,
}

// POST /v1/entities/{id}/run
pub async fn run_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RunBody>,
) -> Result<Json<WorkflowRunResult>, StatusCode> {
    if id != state.workflow.name() {
        return Err(StatusCode::NOT_FOUND);
    }
    if body.input.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    info!(entity = %id, "Running workflow from gateway");
    let result = state.workflow.run(body.input).await;
    Ok(Json(result))
}
