#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use testfleet_server::config::OrchestratorConfig;
use testfleet_server::router::build_app_router;
use testfleet_server::state::AppState;

/// Build a test `OrchestratorConfig` with short timeouts.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        dispatch_timeout_secs: 2,
        kill_timeout_secs: 1,
        ..OrchestratorConfig::default()
    }
}

/// Fresh state plus the full application router built on it.
///
/// The state is returned alongside so tests can seed heartbeats or inspect
/// the registry directly.
pub fn build_test_app() -> (Router, AppState) {
    build_app_with(test_config())
}

/// Same as [`build_test_app`] with an explicit config.
pub fn build_app_with(config: OrchestratorConfig) -> (Router, AppState) {
    let state = AppState::new(config);
    (build_app_router(state.clone()), state)
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed JSON body.
pub async fn expect_json(response: Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
