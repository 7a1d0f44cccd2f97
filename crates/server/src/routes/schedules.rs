use axum::routing::{get, post};
use axum::Router;

use crate::handlers::schedules;
use crate::state::AppState;

/// Routes mounted at `/schedules`.
///
/// ```text
/// POST /next-run -> compute_next_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/next-run", post(schedules::compute_next_run))
}

/// Routes mounted at `/monitors`.
///
/// ```text
/// GET    /{id} -> get_monitor
/// PUT    /{id} -> register_monitor
/// DELETE /{id} -> remove_monitor
/// ```
pub fn monitor_router() -> Router<AppState> {
    Router::new().route(
        "/{id}",
        get(schedules::get_monitor)
            .put(schedules::register_monitor)
            .delete(schedules::remove_monitor),
    )
}
