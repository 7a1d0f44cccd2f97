use axum::routing::post;
use axum::Router;

use crate::handlers::executions;
use crate::state::AppState;

/// Routes mounted at `/executions`.
///
/// ```text
/// POST /            -> create_execution
/// POST /{id}/kill   -> kill_execution
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(executions::create_execution))
        .route("/{id}/kill", post(executions::kill_execution))
}
