use uuid::Uuid;

use testfleet_core::types::NodeId;

/// Errors raised by the agent transport.
///
/// These never escape a dispatch: they are folded into
/// `DispatchOutcome::Rejected` or logged by the connection handler.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid agent frame: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Agent connection for node {node_id} is closed")]
    RouteClosed { node_id: NodeId },

    #[error("No pending command for invocation {0}")]
    UnknownInvocation(Uuid),
}
