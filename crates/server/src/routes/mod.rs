pub mod executions;
pub mod health;
pub mod nodes;
pub mod schedules;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` routes that answer from local state.
///
/// Route hierarchy:
///
/// ```text
/// /nodes                      inventory sync, liveness status
/// /schedules                  next-run computation
/// /monitors                   periodic monitor registration
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::router())
        .nest("/schedules", schedules::router())
        .nest("/monitors", schedules::monitor_router())
}

/// Build the `/api/v1` routes that wait on agent replies.
///
/// Every dispatch settles within its own reply timeout, so these are
/// mounted outside the HTTP request timeout.
///
/// ```text
/// /nodes/{id}/port-check      port availability on one node
/// /executions                 run and kill distributed executions
/// ```
pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::agent_router())
        .nest("/executions", executions::router())
}
