//! Handlers for running and killing distributed executions.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use testfleet_core::types::NodeId;

use crate::engine::ExecutionRequest;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /executions/{id}/kill`.
#[derive(Debug, Deserialize)]
pub struct KillBody {
    /// Nodes the execution was dispatched to.
    pub node_ids: Vec<NodeId>,
}

// ---- POST /executions ----

/// Select nodes, broadcast the run command and return the merged detail.
///
/// Responds once every selected node has settled (acknowledged, timed
/// out, unreachable, rejected or cancelled).
pub async fn create_execution(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> AppResult<impl IntoResponse> {
    if request.execution_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(AppError::BadRequest("execution_id must not be blank".to_string()));
    }
    let report = state.orchestrator.execute(request, Utc::now()).await?;
    Ok(Json(DataResponse { data: report }))
}

// ---- POST /executions/{id}/kill ----

pub async fn kill_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(body): Json<KillBody>,
) -> AppResult<impl IntoResponse> {
    let report = state.orchestrator.kill(&execution_id, &body.node_ids).await;
    Ok(Json(DataResponse { data: report }))
}
