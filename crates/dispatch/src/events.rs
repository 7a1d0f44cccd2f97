use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::router::RouteKey;

/// Capacity of the connection-event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Agent connection lifecycle, published for the server and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    AgentConnected {
        route: RouteKey,
        connection_id: Uuid,
        /// Set when this connection replaced an older one for the same route.
        replaced: Option<Uuid>,
    },
    AgentDisconnected {
        route: RouteKey,
        connection_id: Uuid,
        /// In-flight commands failed because of this disconnect.
        failed_pending: usize,
    },
}

/// Fan-out of [`ChannelEvent`]s. Publishing never blocks and succeeds
/// with no subscribers.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    sender: broadcast::Sender<ChannelEvent>,
}

impl Default for ChannelEvents {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl ChannelEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ChannelEvent) {
        // An error only means there are no subscribers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }
}
