use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::nodes;
use crate::state::AppState;

/// Inventory routes mounted at `/nodes`.
///
/// ```text
/// GET    /                  -> list_nodes (?tenant_id=)
/// GET    /status            -> node_status (?ids=1,2)
/// PUT    /{id}              -> upsert_node
/// DELETE /{id}              -> remove_node
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(nodes::list_nodes))
        .route("/status", get(nodes::node_status))
        .route("/{id}", put(nodes::upsert_node).delete(nodes::remove_node))
}

/// Agent-backed routes mounted at `/nodes`.
///
/// ```text
/// POST   /{id}/port-check   -> port_check
/// ```
pub fn agent_router() -> Router<AppState> {
    Router::new().route("/{id}/port-check", post(nodes::port_check))
}
