use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use testfleet_core::types::{NodeId, TenantId};
use testfleet_dispatch::protocol::AgentMessage;
use testfleet_dispatch::router::{Outbound, RouteKey};
use uuid::Uuid;

use crate::state::AppState;

/// Identity an agent presents when connecting:
/// `/ws/agent?node_id=7` or `/ws/agent?tenant_id=3&node_id=7`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub node_id: NodeId,
}

/// GET /ws/agent -- upgrade an agent connection.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<AgentQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, query, state))
}

/// Manage a single agent connection after upgrade.
///
/// Registers the route with the
/// [`AgentChannel`](testfleet_dispatch::channel::AgentChannel), forwards outbound
/// commands from a sender task, and feeds heartbeats and replies back
/// on the current task until the socket closes.
async fn handle_agent_socket(socket: WebSocket, query: AgentQuery, state: AppState) {
    let route = RouteKey::new(query.tenant_id, query.node_id);
    let connection = state.channel.connect(route);
    let connection_id = connection.connection_id;
    let mut rx = connection.receiver;

    // Connecting counts as a heartbeat.
    state.registry.record_heartbeat(route.node_id, Utc::now());

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match outbound {
                Outbound::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!(%connection_id, error = %e, "Failed to encode command");
                        continue;
                    }
                },
                Outbound::Close => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: axum::extract::ws::close_code::NORMAL,
                            reason: "replaced".into(),
                        })))
                        .await;
                    break;
                }
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(%connection_id, "Agent sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_agent_text(&state, route, connection_id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                tracing::trace!(%connection_id, "Ping/pong received");
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(%connection_id, "Ignoring binary frame from agent");
            }
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "Agent receive error");
                break;
            }
        }
    }

    state.channel.disconnect(route, connection_id);
    send_task.abort();
}

fn handle_agent_text(state: &AppState, route: RouteKey, connection_id: Uuid, text: &str) {
    match AgentMessage::parse(text) {
        Ok(AgentMessage::Heartbeat { timestamp }) => {
            // Agent clocks can run ahead; never record a heartbeat from the future.
            let now = Utc::now();
            let at = timestamp.map_or(now, |t| t.min(now));
            state.registry.record_heartbeat(route.node_id, at);
        }
        Ok(AgentMessage::Reply(frame)) => {
            let invocation_id = frame.invocation_id;
            if let Err(e) = state.channel.deliver_reply(connection_id, frame) {
                tracing::debug!(
                    node_id = route.node_id,
                    %invocation_id,
                    error = %e,
                    "Dropping late or unknown reply",
                );
            }
        }
        Err(e) => {
            tracing::warn!(node_id = route.node_id, error = %e, "Malformed agent frame");
        }
    }
}
