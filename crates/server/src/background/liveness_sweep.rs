//! Periodic liveness sweep.
//!
//! Online status is derived at query time, so nothing here mutates
//! liveness. The sweep only compares consecutive snapshots of the
//! inventory's online set and logs nodes that went offline or came back.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use testfleet_core::registry::NodeRegistry;
use testfleet_core::types::{NodeId, Timestamp};

/// Online-set changes between two sweeps.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub went_offline: Vec<NodeId>,
    pub came_online: Vec<NodeId>,
}

pub struct LivenessSweep {
    registry: Arc<NodeRegistry>,
    stale_after: TimeDelta,
    online: BTreeSet<NodeId>,
}

impl LivenessSweep {
    pub fn new(registry: Arc<NodeRegistry>, stale_after: TimeDelta) -> Self {
        Self {
            registry,
            stale_after,
            online: BTreeSet::new(),
        }
    }

    /// Run the sweep loop until `cancel` is triggered.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), "Liveness sweep started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Liveness sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
    }

    pub fn sweep(&mut self, now: Timestamp) -> SweepReport {
        let ids = self.registry.nodes().into_iter().map(|n| n.id);
        let online = self.registry.online_subset(ids, now, self.stale_after);

        let report = SweepReport {
            went_offline: self.online.difference(&online).copied().collect(),
            came_online: online.difference(&self.online).copied().collect(),
        };
        for node_id in &report.went_offline {
            let last_heartbeat = self.registry.liveness().last_seen(*node_id);
            tracing::warn!(node_id, last_heartbeat = ?last_heartbeat, "Node went offline");
        }
        for node_id in &report.came_online {
            tracing::info!(node_id, "Node online");
        }
        let stale = self.registry.liveness().stale_nodes(now, self.stale_after);
        tracing::debug!(online = online.len(), stale = stale.len(), "Liveness sweep");

        self.online = online;
        report
    }
}
