//! Agent liveness tracking.
//!
//! [`LivenessTracker`] keeps the last heartbeat timestamp per node.
//! "Online" is never stored: it is derived at query time from the
//! last-seen timestamp, the caller's `now`, and a staleness window.
//!
//! The map is sharded ([`DashMap`]) so heartbeat writers and selector /
//! status readers do not contend on a single lock.

use std::collections::BTreeSet;

use chrono::TimeDelta;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{NodeId, Timestamp};

/// Default staleness window: a node with no heartbeat for this many
/// seconds is considered offline.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 60;

/// Last-heartbeat bookkeeping for every node that has ever reported.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    last_seen: DashMap<NodeId, Timestamp>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat for `node_id`.
    ///
    /// Heartbeats are monotonic per node: a timestamp that is not strictly
    /// newer than the stored one is ignored, so a delayed or replayed
    /// heartbeat can never move a node backwards in time.
    ///
    /// Returns `true` if the stored timestamp advanced.
    pub fn record_heartbeat(&self, node_id: NodeId, timestamp: Timestamp) -> bool {
        match self.last_seen.entry(node_id) {
            Entry::Occupied(mut entry) => {
                if timestamp > *entry.get() {
                    entry.insert(timestamp);
                    true
                } else {
                    tracing::debug!(
                        node_id,
                        stored = %entry.get(),
                        received = %timestamp,
                        "Ignoring stale heartbeat",
                    );
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(timestamp);
                true
            }
        }
    }

    /// Last accepted heartbeat for `node_id`, if any.
    pub fn last_seen(&self, node_id: NodeId) -> Option<Timestamp> {
        self.last_seen.get(&node_id).map(|ts| *ts)
    }

    /// A node is online iff `now - last_heartbeat <= stale_after`.
    /// A node that never sent a heartbeat is offline.
    pub fn is_online(&self, node_id: NodeId, now: Timestamp, stale_after: TimeDelta) -> bool {
        self.last_seen(node_id)
            .is_some_and(|last| is_fresh(last, now, stale_after))
    }

    /// The subset of `node_ids` that is currently online.
    pub fn online_subset<I>(
        &self,
        node_ids: I,
        now: Timestamp,
        stale_after: TimeDelta,
    ) -> BTreeSet<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        node_ids
            .into_iter()
            .filter(|id| self.is_online(*id, now, stale_after))
            .collect()
    }

    /// Every tracked node whose last heartbeat is older than the window.
    pub fn stale_nodes(&self, now: Timestamp, stale_after: TimeDelta) -> BTreeSet<NodeId> {
        self.last_seen
            .iter()
            .filter(|entry| !is_fresh(*entry.value(), now, stale_after))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop all liveness state for a node (e.g. when it leaves the inventory).
    pub fn forget(&self, node_id: NodeId) {
        self.last_seen.remove(&node_id);
    }

    /// Number of nodes with at least one recorded heartbeat.
    pub fn tracked_count(&self) -> usize {
        self.last_seen.len()
    }
}

fn is_fresh(last: Timestamp, now: Timestamp, stale_after: TimeDelta) -> bool {
    now.signed_duration_since(last) <= stale_after
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
