//! Wire frames exchanged with node agents over the WebSocket.
//!
//! Server to agent:
//!
//! ```json
//! { "type": "command", "invocation_id": "…", "timeout_ms": 30000,
//!   "request": { "type": "run", "execution_id": "e1", "script_id": "s1", "params": {} } }
//! ```
//!
//! Agent to server: `{ "type": "heartbeat" }` or
//! `{ "type": "reply", "invocation_id": "…", "result": { "status": "ok", "payload": … } }`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use testfleet_core::outcome::{CommandKind, DispatchOutcome};
use testfleet_core::types::Timestamp;

use crate::error::ChannelError;

/// A request the agent executes. Opaque to everything but the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    Run {
        execution_id: String,
        script_id: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Kill {
        execution_id: String,
    },
    PortCheck {
        port: u16,
    },
}

impl AgentRequest {
    pub fn kind(&self) -> CommandKind {
        match self {
            AgentRequest::Run { .. } => CommandKind::Run,
            AgentRequest::Kill { .. } => CommandKind::Kill,
            AgentRequest::PortCheck { .. } => CommandKind::PortCheck,
        }
    }

    /// Execution whose cancellation aborts this request while in flight.
    /// Only runs are tied to their execution; a kill must still go out
    /// after the execution was cancelled.
    pub fn cancellable_execution(&self) -> Option<&str> {
        match self {
            AgentRequest::Run { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }
}

/// Request tagged with its invocation id. Agents dedupe on the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub invocation_id: Uuid,
    pub timeout_ms: u64,
    pub request: AgentRequest,
}

impl CommandEnvelope {
    pub fn new(request: AgentRequest, timeout: Duration) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            request,
        }
    }
}

/// Frames the server sends to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Command(CommandEnvelope),
}

/// Result half of an agent reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyResult {
    Ok {
        #[serde(default)]
        payload: serde_json::Value,
    },
    Error {
        reason: String,
    },
}

impl From<ReplyResult> for DispatchOutcome {
    fn from(result: ReplyResult) -> Self {
        match result {
            ReplyResult::Ok { payload } => DispatchOutcome::Acknowledged { payload },
            ReplyResult::Error { reason } => DispatchOutcome::Rejected { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub invocation_id: Uuid,
    pub result: ReplyResult,
}

/// Frames an agent sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Liveness ping. Without a timestamp the receive time is used.
    Heartbeat {
        #[serde(default)]
        timestamp: Option<Timestamp>,
    },
    Reply(ReplyFrame),
}

impl AgentMessage {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn command_frame_shape() {
        let envelope = CommandEnvelope::new(
            AgentRequest::Kill {
                execution_id: "exec-1".into(),
            },
            Duration::from_secs(10),
        );
        let id = envelope.invocation_id;
        let json = serde_json::to_value(ServerMessage::Command(envelope)).unwrap();

        assert_eq!(json["type"], "command");
        assert_eq!(json["invocation_id"], id.to_string());
        assert_eq!(json["timeout_ms"], 10_000);
        assert_eq!(json["request"]["type"], "kill");
        assert_eq!(json["request"]["execution_id"], "exec-1");
    }

    #[test]
    fn each_envelope_gets_a_fresh_invocation_id() {
        let req = AgentRequest::PortCheck { port: 8080 };
        let a = CommandEnvelope::new(req.clone(), Duration::from_secs(1));
        let b = CommandEnvelope::new(req, Duration::from_secs(1));
        assert_ne!(a.invocation_id, b.invocation_id);
    }

    #[test]
    fn parses_heartbeat_with_and_without_timestamp() {
        assert_matches!(
            AgentMessage::parse(r#"{"type":"heartbeat"}"#),
            Ok(AgentMessage::Heartbeat { timestamp: None })
        );
        assert_matches!(
            AgentMessage::parse(r#"{"type":"heartbeat","timestamp":"2024-05-01T12:00:00Z"}"#),
            Ok(AgentMessage::Heartbeat { timestamp: Some(_) })
        );
    }

    #[test]
    fn reply_maps_to_outcome() {
        let id = Uuid::new_v4();
        let text = json!({
            "type": "reply",
            "invocation_id": id,
            "result": { "status": "error", "reason": "script not found" },
        })
        .to_string();

        let Ok(AgentMessage::Reply(frame)) = AgentMessage::parse(&text) else {
            panic!("expected reply frame");
        };
        assert_eq!(frame.invocation_id, id);
        assert_eq!(
            DispatchOutcome::from(frame.result),
            DispatchOutcome::rejected("script not found")
        );
    }

    #[test]
    fn garbage_is_protocol_error() {
        assert_matches!(
            AgentMessage::parse("{not json"),
            Err(ChannelError::Protocol(_))
        );
        assert_matches!(
            AgentMessage::parse(r#"{"type":"telemetry"}"#),
            Err(ChannelError::Protocol(_))
        );
    }

    #[test]
    fn only_runs_are_cancellable() {
        let run = AgentRequest::Run {
            execution_id: "e".into(),
            script_id: "s".into(),
            params: json!(null),
        };
        assert_eq!(run.cancellable_execution(), Some("e"));
        assert_eq!(
            AgentRequest::Kill {
                execution_id: "e".into()
            }
            .cancellable_execution(),
            None
        );
    }
}
