use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use testfleet_core::types::{NodeId, TenantId, Timestamp};

use crate::error::ChannelError;
use crate::protocol::ServerMessage;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Ask the writer to close the socket.
    Close,
}

/// Channel sender half for pushing frames to an agent connection.
pub type AgentSender = mpsc::UnboundedSender<Outbound>;

/// Identifies an agent route. Shared-pool agents connect without a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub tenant_id: Option<TenantId>,
    pub node_id: NodeId,
}

impl RouteKey {
    pub fn new(tenant_id: Option<TenantId>, node_id: NodeId) -> Self {
        Self { tenant_id, node_id }
    }
}

/// Transport handle for one live agent connection.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    pub connection_id: Uuid,
    pub sender: AgentSender,
    pub connected_at: Timestamp,
}

impl ChannelRouter {
    pub fn send(&self, node_id: NodeId, message: ServerMessage) -> Result<(), ChannelError> {
        self.sender
            .send(Outbound::Message(message))
            .map_err(|_| ChannelError::RouteClosed { node_id })
    }
}

/// Live routes, keyed by (tenant, node). At most one route per key.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<RouteKey, ChannelRouter>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route, returning the one it replaced.
    pub fn insert(&self, key: RouteKey, router: ChannelRouter) -> Option<ChannelRouter> {
        self.routes.insert(key, router)
    }

    /// Remove the route for `key` only if it still belongs to
    /// `connection_id`, so a stale disconnect cannot evict a newer agent.
    pub fn remove_if_current(&self, key: &RouteKey, connection_id: Uuid) -> bool {
        self.routes
            .remove_if(key, |_, router| router.connection_id == connection_id)
            .is_some()
    }

    /// Resolve a route at dispatch time. Handles are cloned, never cached
    /// by callers across dispatches.
    pub fn resolve(&self, key: &RouteKey) -> Option<ChannelRouter> {
        self.routes.get(key).map(|r| r.clone())
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.routes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Remove every route and return them.
    pub fn drain(&self) -> Vec<(RouteKey, ChannelRouter)> {
        let keys: Vec<RouteKey> = self.routes.iter().map(|r| *r.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.routes.remove(&key))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
