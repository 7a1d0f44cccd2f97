//! Handlers for schedule computation and monitor registration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use testfleet_core::error::CoreError;
use testfleet_core::schedule::{self, MonitorTimeSetting};
use testfleet_core::types::Timestamp;

use crate::error::{AppError, AppResult};
use crate::monitors::{MonitorId, MonitorRegistration};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /schedules/next-run`.
#[derive(Debug, Deserialize)]
pub struct NextRunRequest {
    pub time_setting: MonitorTimeSetting,
    #[serde(default)]
    pub last_exec_date: Option<Timestamp>,
    /// Reference time; defaults to the server clock.
    #[serde(default)]
    pub now: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct NextRunResponse {
    pub next_run: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    pub monitor_id: MonitorId,
    pub next_run: Timestamp,
}

// ---- POST /schedules/next-run ----

pub async fn compute_next_run(Json(body): Json<NextRunRequest>) -> AppResult<impl IntoResponse> {
    let now = body.now.unwrap_or_else(Utc::now);
    let next_run = schedule::next_run(&body.time_setting, body.last_exec_date, now)?;
    Ok(Json(DataResponse {
        data: NextRunResponse { next_run },
    }))
}

// ---- PUT /monitors/{id} ----

/// Register or replace a monitor. Responds 201 when the id is new.
pub async fn register_monitor(
    State(state): State<AppState>,
    Path(id): Path<MonitorId>,
    Json(body): Json<MonitorRegistration>,
) -> AppResult<impl IntoResponse> {
    let existed = state.monitors.get(id).is_some();
    let next_run = state.monitors.register(id, body, Utc::now())?;
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(DataResponse {
            data: MonitorResponse {
                monitor_id: id,
                next_run,
            },
        }),
    ))
}

// ---- GET /monitors/{id} ----

pub async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<MonitorId>,
) -> AppResult<impl IntoResponse> {
    let entry = state
        .monitors
        .get(id)
        .ok_or(AppError::Core(CoreError::NotFound { entity: "monitor", id }))?;
    Ok(Json(DataResponse {
        data: MonitorResponse {
            monitor_id: id,
            next_run: entry.next_run,
        },
    }))
}

// ---- DELETE /monitors/{id} ----

pub async fn remove_monitor(
    State(state): State<AppState>,
    Path(id): Path<MonitorId>,
) -> AppResult<StatusCode> {
    if state.monitors.remove(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Core(CoreError::NotFound { entity: "monitor", id }))
    }
}
