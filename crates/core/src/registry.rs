//! Node inventory plus liveness.
//!
//! [`NodeRegistry`] is the single in-memory view of "which nodes exist and
//! which of them are reachable" consulted by the selector and by status
//! queries. Inventory is synced from the node-management layer; liveness
//! is fed by agent heartbeats. Both start empty on process restart.

use std::collections::BTreeSet;

use chrono::TimeDelta;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::CoreError;
use crate::liveness::LivenessTracker;
use crate::node::{validate_node, Node};
use crate::types::{NodeId, TenantId, Timestamp};

/// Point-in-time liveness view of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    /// Whether the node is present in the inventory.
    pub known: bool,
    pub online: bool,
    pub last_heartbeat: Option<Timestamp>,
}

/// Known nodes and their last-seen timestamps.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, Node>,
    liveness: LivenessTracker,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- inventory ----

    /// Insert or replace a node's inventory attributes.
    ///
    /// Returns `true` when the node was not previously known.
    pub fn upsert_node(&self, node: Node) -> Result<bool, CoreError> {
        validate_node(&node)?;
        let node_id = node.id;
        let is_new = self.nodes.insert(node_id, node).is_none();
        if is_new {
            tracing::info!(node_id, "Node added to inventory");
        } else {
            tracing::debug!(node_id, "Node inventory updated");
        }
        Ok(is_new)
    }

    /// Remove a node from the inventory and drop its liveness state.
    pub fn remove_node(&self, node_id: NodeId) -> Option<Node> {
        let removed = self.nodes.remove(&node_id).map(|(_, node)| node);
        if removed.is_some() {
            self.liveness.forget(node_id);
            tracing::info!(node_id, "Node removed from inventory");
        }
        removed
    }

    pub fn get(&self, node_id: NodeId) -> Option<Node> {
        self.nodes.get(&node_id).map(|n| n.clone())
    }

    /// Fetch a node or fail with [`CoreError::NotFound`].
    pub fn require(&self, node_id: NodeId) -> Result<Node, CoreError> {
        self.get(node_id).ok_or(CoreError::NotFound {
            entity: "node",
            id: node_id,
        })
    }

    /// All known nodes, ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        let mut all: Vec<Node> = self.nodes.iter().map(|n| n.value().clone()).collect();
        all.sort_by_key(|n| n.id);
        all
    }

    /// Nodes a tenant may schedule on (shared pool plus its own), ordered by id.
    pub fn visible_to(&self, tenant_id: TenantId) -> Vec<Node> {
        let mut visible: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.is_visible_to(tenant_id))
            .map(|n| n.value().clone())
            .collect();
        visible.sort_by_key(|n| n.id);
        visible
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ---- liveness ----

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// See [`LivenessTracker::record_heartbeat`]. Heartbeats from nodes not
    /// yet in the inventory are accepted: agents may connect before the
    /// inventory sync reaches this process.
    pub fn record_heartbeat(&self, node_id: NodeId, timestamp: Timestamp) -> bool {
        self.liveness.record_heartbeat(node_id, timestamp)
    }

    pub fn is_online(&self, node_id: NodeId, now: Timestamp, stale_after: TimeDelta) -> bool {
        self.liveness.is_online(node_id, now, stale_after)
    }

    pub fn online_subset<I>(
        &self,
        node_ids: I,
        now: Timestamp,
        stale_after: TimeDelta,
    ) -> BTreeSet<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.liveness.online_subset(node_ids, now, stale_after)
    }

    /// Liveness status for each requested id, in request order.
    pub fn status(
        &self,
        node_ids: &[NodeId],
        now: Timestamp,
        stale_after: TimeDelta,
    ) -> Vec<NodeStatus> {
        node_ids
            .iter()
            .map(|&node_id| NodeStatus {
                node_id,
                known: self.nodes.contains_key(&node_id),
                online: self.liveness.is_online(node_id, now, stale_after),
                last_heartbeat: self.liveness.last_seen(node_id),
            })
            .collect()
    }

    /// Number of inventory nodes currently online.
    pub fn online_count(&self, now: Timestamp, stale_after: TimeDelta) -> usize {
        self.nodes
            .iter()
            .filter(|n| self.liveness.is_online(*n.key(), now, stale_after))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
