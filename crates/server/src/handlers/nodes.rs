//! Handlers for node inventory sync and liveness queries.
//!
//! The node-management layer owns the persistent inventory and pushes
//! every change here; this process only keeps the in-memory copy the
//! selector and liveness checks read.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use testfleet_core::error::CoreError;
use testfleet_core::node::{Node, NodeRole};
use testfleet_core::types::{NodeId, TenantId};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `PUT /nodes/{id}`. The id comes from the path.
#[derive(Debug, Deserialize)]
pub struct UpsertNode {
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub role: NodeRole,
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub trial: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListNodesParams {
    /// Restrict to nodes visible to this tenant.
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// Comma-separated node ids, e.g. `ids=1,2,3`.
    pub ids: String,
}

#[derive(Debug, Deserialize)]
pub struct PortCheckBody {
    pub port: u16,
}

/// Parse a comma-separated id list. Blank entries are skipped.
fn parse_ids(raw: &str) -> AppResult<Vec<NodeId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<NodeId>()
                .map_err(|_| AppError::BadRequest(format!("Invalid node id '{s}'")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// GET /nodes
// ---------------------------------------------------------------------------

/// List the inventory, optionally filtered by tenant visibility.
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(params): Query<ListNodesParams>,
) -> AppResult<impl IntoResponse> {
    let nodes = match params.tenant_id {
        Some(tenant_id) => state.registry.visible_to(tenant_id),
        None => state.registry.nodes(),
    };
    Ok(Json(DataResponse { data: nodes }))
}

// ---------------------------------------------------------------------------
// PUT /nodes/{id}
// ---------------------------------------------------------------------------

/// Insert or replace a node. Responds 201 when the node is new.
pub async fn upsert_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    Json(body): Json<UpsertNode>,
) -> AppResult<impl IntoResponse> {
    let node = Node {
        id,
        tenant_id: body.tenant_id,
        role: body.role,
        address: body.address,
        enabled: body.enabled,
        trial: body.trial,
    };
    let created = state.registry.upsert_node(node.clone())?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(DataResponse { data: node })))
}

// ---------------------------------------------------------------------------
// DELETE /nodes/{id}
// ---------------------------------------------------------------------------

pub async fn remove_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> AppResult<StatusCode> {
    state
        .registry
        .remove_node(id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(AppError::Core(CoreError::NotFound { entity: "node", id }))
}

// ---------------------------------------------------------------------------
// GET /nodes/status?ids=1,2
// ---------------------------------------------------------------------------

/// Liveness status for each requested id, in request order. Unknown ids
/// are reported with `known: false` rather than failing the batch.
pub async fn node_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> AppResult<impl IntoResponse> {
    let ids = parse_ids(&params.ids)?;
    let statuses = state
        .registry
        .status(&ids, Utc::now(), state.config.stale_after());
    Ok(Json(DataResponse { data: statuses }))
}

// ---------------------------------------------------------------------------
// POST /nodes/{id}/port-check
// ---------------------------------------------------------------------------

pub async fn port_check(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    Json(body): Json<PortCheckBody>,
) -> AppResult<impl IntoResponse> {
    if body.port == 0 {
        return Err(AppError::BadRequest("Port must be between 1 and 65535".to_string()));
    }
    let report = state.orchestrator.port_check(id, body.port).await?;
    Ok(Json(DataResponse { data: report }))
}
