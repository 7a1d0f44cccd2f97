//! Agent WebSocket endpoint.
//!
//! Every agent keeps one socket open at `GET /ws/agent`. The server pushes
//! commands down it; the agent answers with heartbeats and replies.

pub mod agent;

pub use agent::{agent_ws_handler, AgentQuery};
