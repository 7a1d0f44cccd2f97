//! Integration tests for `/api/v1/executions`.
//!
//! Agents here are in-process connections on the channel; WebSocket round
//! trips are covered in `agent_ws.rs`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use chrono::Utc;
use common::{expect_json, post_json, put_json};
use serde_json::json;
use testfleet_dispatch::protocol::{ReplyFrame, ReplyResult, ServerMessage};
use testfleet_dispatch::router::{Outbound, RouteKey};
use testfleet_server::config::OrchestratorConfig;
use testfleet_server::state::AppState;

async fn seed_online_nodes(app: &Router, state: &AppState, ids: &[i64]) {
    for &id in ids {
        let body = json!({ "address": format!("10.0.0.{id}") });
        put_json(app.clone(), &format!("/api/v1/nodes/{id}"), body).await;
        state.registry.record_heartbeat(id, Utc::now());
    }
}

/// Connect an agent for a shared node that passes every command.
fn spawn_passing_agent(state: &AppState, node_id: i64) {
    let channel = Arc::clone(&state.channel);
    let mut conn = channel.connect(RouteKey::new(None, node_id));
    tokio::spawn(async move {
        while let Some(Outbound::Message(ServerMessage::Command(envelope))) =
            conn.receiver.recv().await
        {
            let payload = json!({
                "samples": [{
                    "status": "passed",
                    "started_at": Utc::now(),
                    "content": { "kind": "log", "text": format!("ran on {node_id}") },
                }]
            });
            let _ = channel.deliver_reply(
                conn.connection_id,
                ReplyFrame {
                    invocation_id: envelope.invocation_id,
                    result: ReplyResult::Ok { payload },
                },
            );
        }
    });
}

// ---------------------------------------------------------------------------
// Test: desired = 0 is a configuration error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_desired_is_configuration_error() {
    let (app, _) = common::build_test_app();
    let body = json!({ "tenant_id": 1, "script_id": "login", "desired": 0 });
    let json = expect_json(
        post_json(app, "/api/v1/executions", body).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(json["code"], "CONFIGURATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: a short pool is 409 with the partial selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_pool_is_insufficient_capacity() {
    let (app, state) = common::build_test_app();
    seed_online_nodes(&app, &state, &[1]).await;

    let body = json!({ "tenant_id": 1, "script_id": "login", "desired": 3 });
    let json =
        expect_json(post_json(app, "/api/v1/executions", body).await, StatusCode::CONFLICT).await;

    assert_eq!(json["code"], "INSUFFICIENT_CAPACITY");
    assert_eq!(json["selection"]["selected"], json!([1]));
    let failures = json["selection"]["failures"].as_array().unwrap();
    assert!(failures.iter().any(|f| f["reason"]["code"] == "INSUFFICIENT_NODES"
        && f["reason"]["requested"] == 3
        && f["reason"]["available"] == 1));
}

// ---------------------------------------------------------------------------
// Test: explicit candidates carry per-node reasons
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_candidates_report_unknown_and_offline() {
    let (app, state) = common::build_test_app();
    seed_online_nodes(&app, &state, &[1]).await;
    put_json(app.clone(), "/api/v1/nodes/2", json!({ "address": "10.0.0.2" })).await;

    let body = json!({
        "tenant_id": 1,
        "script_id": "login",
        "desired": 3,
        "candidate_node_ids": [1, 2, 42],
    });
    let json =
        expect_json(post_json(app, "/api/v1/executions", body).await, StatusCode::CONFLICT).await;
    let failures = json["selection"]["failures"].as_array().unwrap();

    let reason_for = |id: i64| {
        failures
            .iter()
            .find(|f| f["node_id"] == id)
            .map(|f| f["reason"]["code"].clone())
    };
    assert_eq!(reason_for(2), Some(json!("OFFLINE")));
    assert_eq!(reason_for(42), Some(json!("UNKNOWN_NODE")));
}

// ---------------------------------------------------------------------------
// Test: selected nodes without agents settle as unreachable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_without_agents_reports_connection_failures() {
    let (app, state) = common::build_test_app();
    seed_online_nodes(&app, &state, &[1, 2]).await;

    let body = json!({
        "execution_id": "exec-1",
        "tenant_id": 1,
        "script_id": "login",
        "desired": 2,
    });
    let json = expect_json(post_json(app, "/api/v1/executions", body).await, StatusCode::OK).await;
    let data = &json["data"];

    assert_eq!(data["execution_id"], "exec-1");
    assert_eq!(data["selection"]["selected"], json!([1, 2]));
    assert_eq!(data["command"]["status"], "failure");
    assert_eq!(data["command"]["targeted"], 2);

    let causes = data["detail"]["error_causes"].as_array().unwrap();
    assert_eq!(causes.len(), 2);
    assert!(causes.iter().all(|c| c["kind"] == "connection"));
    assert!(data["detail"]["samples"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: allow_partial runs on what is available
// ---------------------------------------------------------------------------

#[tokio::test]
async fn allow_partial_runs_on_available_nodes() {
    let (app, state) = common::build_test_app();
    seed_online_nodes(&app, &state, &[1]).await;

    let body = json!({
        "tenant_id": 1,
        "script_id": "login",
        "desired": 2,
        "allow_partial": true,
    });
    let json =
        expect_json(post_json(app.clone(), "/api/v1/executions", body).await, StatusCode::OK).await;
    assert_eq!(json["data"]["selection"]["selected"], json!([1]));

    // Still 409 when nothing at all is available.
    let body = json!({
        "tenant_id": 1,
        "script_id": "login",
        "desired": 2,
        "allow_partial": true,
        "candidate_node_ids": [77],
    });
    let response = post_json(app, "/api/v1/executions", body).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Test: kill without agents is best-effort with unknown outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kill_without_agents_reports_unknown_outcomes() {
    let (app, state) = common::build_test_app();
    seed_online_nodes(&app, &state, &[1, 2]).await;

    let json = expect_json(
        post_json(app, "/api/v1/executions/exec-9/kill", json!({ "node_ids": [1, 2] })).await,
        StatusCode::OK,
    )
    .await;
    let data = &json["data"];

    assert_eq!(data["execution_id"], "exec-9");
    assert_eq!(data["cancelled_locally"], false);
    assert_eq!(data["command"]["command"], "kill");
    assert_eq!(data["command"]["status"], "failure");
    let failures = data["command"]["failures"].as_array().unwrap();
    assert!(failures.iter().all(|f| f["outcome_unknown"] == true));
}

#[tokio::test]
async fn kill_with_no_nodes_is_vacuous_success() {
    let (app, _) = common::build_test_app();
    let json = expect_json(
        post_json(app, "/api/v1/executions/exec-9/kill", json!({ "node_ids": [] })).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(json["data"]["command"]["status"], "success");
    assert_eq!(json["data"]["command"]["targeted"], 0);
}

// ---------------------------------------------------------------------------
// Test: with shipped timeouts a silent node is a partial failure, not a 408
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_node_is_partial_failure_with_default_timeouts() {
    let (app, state) = common::build_app_with(OrchestratorConfig::default());
    seed_online_nodes(&app, &state, &[1, 2]).await;
    spawn_passing_agent(&state, 1);
    let _silent = state.channel.connect(RouteKey::new(None, 2));

    let body = json!({
        "execution_id": "exec-1",
        "tenant_id": 1,
        "script_id": "login",
        "desired": 2,
    });
    let json = expect_json(post_json(app, "/api/v1/executions", body).await, StatusCode::OK).await;
    let command = &json["data"]["command"];

    assert_eq!(command["status"], "partial_failure");
    assert_eq!(command["acknowledged"], json!([1]));
    assert_eq!(command["failures"][0]["node_id"], 2);
    assert_eq!(command["failures"][0]["outcome"], "timeout");
    assert_eq!(state.channel.pending_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: an abandoned request releases its execution id
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn abandoned_request_does_not_poison_execution_id() {
    let (app, state) = common::build_app_with(OrchestratorConfig::default());
    seed_online_nodes(&app, &state, &[1]).await;
    let _silent = state.channel.connect(RouteKey::new(None, 1));

    let body = json!({
        "execution_id": "exec-1",
        "tenant_id": 1,
        "script_id": "login",
        "desired": 1,
    });
    let abandoned = tokio::time::timeout(
        Duration::from_secs(5),
        post_json(app.clone(), "/api/v1/executions", body.clone()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(state.channel.pending_count(), 0);

    let json = expect_json(
        post_json(app.clone(), "/api/v1/executions/exec-1/kill", json!({ "node_ids": [1] })).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(json["data"]["cancelled_locally"], false);

    spawn_passing_agent(&state, 1);
    let json = expect_json(post_json(app, "/api/v1/executions", body).await, StatusCode::OK).await;
    assert_eq!(json["data"]["command"]["status"], "success");
    assert_eq!(json["data"]["command"]["acknowledged"], json!([1]));
}
