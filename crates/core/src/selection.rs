//! Node selection for execution requests.
//!
//! [`NodeSelector::select`] turns an [`ExecutionIntent`] into a concrete
//! node set:
//!
//! 1. Build the candidate pool: the explicitly requested ids (restricted to
//!    nodes the tenant can see), or every node visible to the tenant.
//! 2. Keep only enabled, role-matching, online nodes.
//! 3. Order the eligible nodes by [`SelectionStrategy`] and take `desired`.
//! 4. Report a shortfall as [`SelectFailureReason::InsufficientNodes`]
//!    rather than failing. The caller decides whether a partial allocation
//!    is acceptable.
//!
//! Eligible pools are ordered by node id before the strategy runs, so the
//! result depends only on registry state, `now`, the round-robin cursor
//! and (for [`SelectionStrategy::Random`]) the explicit seed.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::TimeDelta;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{Node, NodeRole};
use crate::registry::NodeRegistry;
use crate::types::{NodeId, TenantId, Timestamp};

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// Policy governing which eligible nodes are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Shared/trial nodes before tenant-owned nodes.
    #[default]
    FreeFirst,
    /// Nodes from the previous run of the same target first, then free-first.
    Affinity,
    /// Rotate the starting offset across successive calls to spread load.
    RoundRobin,
    /// Seeded shuffle. The seed is explicit so runs are reproducible.
    Random { seed: u64 },
}

/// One execution request as handed over by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub tenant_id: TenantId,
    /// Script / runner identifier, opaque to the orchestrator.
    pub script_id: String,
    /// How many nodes the run should occupy.
    pub desired: usize,
    /// Explicit candidates. Empty means "any visible node".
    #[serde(default)]
    pub candidate_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Nodes used by the previous execution of the same target.
    /// Only consulted by [`SelectionStrategy::Affinity`].
    #[serde(default)]
    pub last_exec_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub required_role: NodeRole,
}

/// Reject intents that cannot be satisfied by any pool state.
pub fn validate_intent(intent: &ExecutionIntent) -> Result<(), CoreError> {
    if intent.desired == 0 {
        return Err(CoreError::config("desired node count must be at least 1"));
    }
    if intent.script_id.trim().is_empty() {
        return Err(CoreError::config("script_id must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Why a node (or the request as a whole) could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectFailureReason {
    /// Requested id is not in the inventory.
    UnknownNode,
    /// Node belongs to another tenant.
    NotVisible,
    Disabled,
    RoleMismatch,
    /// No heartbeat within the staleness window.
    Offline,
    /// Fewer eligible nodes than requested.
    InsufficientNodes { requested: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectFailure {
    /// The node concerned, or `None` for request-level reasons.
    pub node_id: Option<NodeId>,
    pub reason: SelectFailureReason,
}

/// Outcome of [`NodeSelector::select`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Chosen nodes in strategy order. Never longer than `desired`,
    /// never contains duplicates.
    pub selected: Vec<NodeId>,
    pub failures: Vec<SelectFailure>,
}

impl SelectionResult {
    /// `(requested, available)` if the pool could not cover the request.
    pub fn shortfall(&self) -> Option<(usize, usize)> {
        self.failures.iter().find_map(|f| match f.reason {
            SelectFailureReason::InsufficientNodes { requested, available } => {
                Some((requested, available))
            }
            _ => None,
        })
    }

    /// Whether the full desired count was allocated.
    pub fn is_complete(&self) -> bool {
        self.shortfall().is_none()
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Chooses nodes for execution intents from a shared [`NodeRegistry`].
pub struct NodeSelector {
    registry: Arc<NodeRegistry>,
    stale_after: TimeDelta,
    /// Round-robin starting offset, advanced by each rotating selection.
    cursor: AtomicUsize,
}

impl NodeSelector {
    pub fn new(registry: Arc<NodeRegistry>, stale_after: TimeDelta) -> Self {
        Self {
            registry,
            stale_after,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Select nodes for `intent` as of `now`.
    ///
    /// Only configuration problems are errors. A short pool yields a
    /// partial [`SelectionResult`] with an `InsufficientNodes` reason.
    pub fn select(
        &self,
        intent: &ExecutionIntent,
        now: Timestamp,
    ) -> Result<SelectionResult, CoreError> {
        validate_intent(intent)?;

        let mut failures = Vec::new();
        let explicit = !intent.candidate_node_ids.is_empty();
        let pool = self.candidate_pool(intent, &mut failures);

        let mut eligible = Vec::with_capacity(pool.len());
        for node in pool {
            match self.ineligibility(&node, intent.required_role, now) {
                None => eligible.push(node),
                // Implicit pools would otherwise report every offline shared
                // node; only explicit requests get per-node reasons.
                Some(reason) if explicit => failures.push(SelectFailure {
                    node_id: Some(node.id),
                    reason,
                }),
                Some(_) => {}
            }
        }

        let available = eligible.len();
        let ordered = self.order(intent, eligible);
        let selected: Vec<NodeId> = ordered.into_iter().take(intent.desired).collect();

        if available < intent.desired {
            tracing::warn!(
                tenant_id = intent.tenant_id,
                script_id = %intent.script_id,
                requested = intent.desired,
                available,
                "Insufficient eligible nodes for execution",
            );
            failures.push(SelectFailure {
                node_id: None,
                reason: SelectFailureReason::InsufficientNodes {
                    requested: intent.desired,
                    available,
                },
            });
        }

        tracing::debug!(
            tenant_id = intent.tenant_id,
            strategy = ?intent.strategy,
            selected = ?selected,
            "Node selection complete",
        );

        Ok(SelectionResult { selected, failures })
    }

    /// Step 1: explicit candidates (deduplicated, visible only) or every
    /// node visible to the tenant. Ordered by id.
    fn candidate_pool(
        &self,
        intent: &ExecutionIntent,
        failures: &mut Vec<SelectFailure>,
    ) -> Vec<Node> {
        if intent.candidate_node_ids.is_empty() {
            return self.registry.visible_to(intent.tenant_id);
        }

        let requested: BTreeSet<NodeId> = intent.candidate_node_ids.iter().copied().collect();
        let mut pool = Vec::with_capacity(requested.len());
        for node_id in requested {
            match self.registry.get(node_id) {
                None => failures.push(SelectFailure {
                    node_id: Some(node_id),
                    reason: SelectFailureReason::UnknownNode,
                }),
                Some(node) if !node.is_visible_to(intent.tenant_id) => failures.push(SelectFailure {
                    node_id: Some(node_id),
                    reason: SelectFailureReason::NotVisible,
                }),
                Some(node) => pool.push(node),
            }
        }
        pool
    }

    /// Step 2: the first reason `node` cannot take the run, if any.
    fn ineligibility(
        &self,
        node: &Node,
        role: NodeRole,
        now: Timestamp,
    ) -> Option<SelectFailureReason> {
        if !node.enabled {
            Some(SelectFailureReason::Disabled)
        } else if node.role != role {
            Some(SelectFailureReason::RoleMismatch)
        } else if !self.registry.is_online(node.id, now, self.stale_after) {
            Some(SelectFailureReason::Offline)
        } else {
            None
        }
    }

    /// Step 3: strategy ordering over an id-ordered eligible pool.
    fn order(&self, intent: &ExecutionIntent, eligible: Vec<Node>) -> Vec<NodeId> {
        match intent.strategy {
            SelectionStrategy::FreeFirst => free_first(&eligible),
            SelectionStrategy::Affinity => affinity_first(&eligible, &intent.last_exec_node_ids),
            SelectionStrategy::RoundRobin => {
                let ids: Vec<NodeId> = eligible.iter().map(|n| n.id).collect();
                if ids.len() <= intent.desired {
                    return ids;
                }
                let offset = self.cursor.fetch_add(intent.desired, Ordering::Relaxed) % ids.len();
                rotate(ids, offset)
            }
            SelectionStrategy::Random { seed } => {
                let mut ids: Vec<NodeId> = eligible.iter().map(|n| n.id).collect();
                let mut rng = StdRng::seed_from_u64(seed);
                ids.shuffle(&mut rng);
                ids
            }
        }
    }
}

/// Shared/trial nodes first, then tenant-owned, each group in id order.
fn free_first(eligible: &[Node]) -> Vec<NodeId> {
    let (free, owned): (Vec<&Node>, Vec<&Node>) = eligible.iter().partition(|n| n.is_free());
    free.into_iter().chain(owned).map(|n| n.id).collect()
}

/// Still-eligible nodes from the previous run (in their original order),
/// followed by the free-first ordering of the rest.
fn affinity_first(eligible: &[Node], last_exec: &[NodeId]) -> Vec<NodeId> {
    let eligible_ids: BTreeSet<NodeId> = eligible.iter().map(|n| n.id).collect();
    let mut seen = BTreeSet::new();
    let mut ordered: Vec<NodeId> = last_exec
        .iter()
        .copied()
        .filter(|id| eligible_ids.contains(id) && seen.insert(*id))
        .collect();
    ordered.extend(free_first(eligible).into_iter().filter(|id| !seen.contains(id)));
    ordered
}

fn rotate(mut ids: Vec<NodeId>, offset: usize) -> Vec<NodeId> {
    ids.rotate_left(offset);
    ids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;

    const TENANT: TenantId = 7;

    fn now() -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn node(id: NodeId, tenant_id: Option<TenantId>) -> Node {
        Node {
            id,
            tenant_id,
            role: NodeRole::Execution,
            address: format!("10.0.0.{id}"),
            enabled: true,
            trial: false,
        }
    }

    /// Registry where every node in `online` has a fresh heartbeat.
    fn selector(nodes: Vec<Node>, online: &[NodeId]) -> NodeSelector {
        let registry = Arc::new(NodeRegistry::new());
        for n in nodes {
            registry.upsert_node(n).unwrap();
        }
        for &id in online {
            registry.record_heartbeat(id, now() - TimeDelta::seconds(5));
        }
        NodeSelector::new(registry, TimeDelta::seconds(60))
    }

    fn intent(desired: usize, strategy: SelectionStrategy) -> ExecutionIntent {
        ExecutionIntent {
            tenant_id: TENANT,
            script_id: "load-test".to_string(),
            desired,
            candidate_node_ids: Vec::new(),
            strategy,
            last_exec_node_ids: Vec::new(),
            required_role: NodeRole::Execution,
        }
    }

    fn distinct(ids: &[NodeId]) -> bool {
        ids.iter().collect::<BTreeSet<_>>().len() == ids.len()
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn zero_desired_is_configuration_error() {
        let sel = selector(vec![node(1, None)], &[1]);
        assert_matches!(
            sel.select(&intent(0, SelectionStrategy::FreeFirst), now()),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn blank_script_id_is_configuration_error() {
        let sel = selector(vec![node(1, None)], &[1]);
        let mut i = intent(1, SelectionStrategy::FreeFirst);
        i.script_id = "  ".to_string();
        assert_matches!(sel.select(&i, now()), Err(CoreError::Configuration(_)));
    }

    // -- pool + filtering -----------------------------------------------------

    #[test]
    fn offline_and_foreign_nodes_never_selected() {
        let sel = selector(
            vec![node(1, None), node(2, None), node(3, Some(99)), node(4, Some(TENANT))],
            &[1, 3, 4],
        );
        let result = sel.select(&intent(4, SelectionStrategy::FreeFirst), now()).unwrap();
        assert_eq!(result.selected, vec![1, 4]);
        assert_eq!(result.shortfall(), Some((4, 2)));
    }

    #[test]
    fn disabled_and_controller_nodes_filtered() {
        let mut disabled = node(2, None);
        disabled.enabled = false;
        let mut controller = node(3, None);
        controller.role = NodeRole::Controller;
        let sel = selector(vec![node(1, None), disabled, controller], &[1, 2, 3]);

        let result = sel.select(&intent(1, SelectionStrategy::FreeFirst), now()).unwrap();
        assert_eq!(result.selected, vec![1]);
        assert!(result.is_complete());
    }

    #[test]
    fn explicit_candidates_report_per_node_reasons() {
        let mut disabled = node(2, None);
        disabled.enabled = false;
        let sel = selector(
            vec![node(1, None), disabled, node(3, Some(99)), node(4, None)],
            &[1, 2, 3],
        );
        let mut i = intent(2, SelectionStrategy::FreeFirst);
        i.candidate_node_ids = vec![1, 2, 3, 4, 5, 1];

        let result = sel.select(&i, now()).unwrap();
        assert_eq!(result.selected, vec![1]);

        let reason_for = |id: NodeId| {
            result
                .failures
                .iter()
                .find(|f| f.node_id == Some(id))
                .map(|f| f.reason.clone())
        };
        assert_eq!(reason_for(2), Some(SelectFailureReason::Disabled));
        assert_eq!(reason_for(3), Some(SelectFailureReason::NotVisible));
        assert_eq!(reason_for(4), Some(SelectFailureReason::Offline));
        assert_eq!(reason_for(5), Some(SelectFailureReason::UnknownNode));
        assert_eq!(result.shortfall(), Some((2, 1)));
    }

    #[test]
    fn implicit_pool_does_not_list_offline_nodes() {
        let sel = selector(vec![node(1, None), node(2, None)], &[1]);
        let result = sel.select(&intent(1, SelectionStrategy::FreeFirst), now()).unwrap();
        assert_eq!(result.selected, vec![1]);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn empty_pool_yields_shortfall_not_error() {
        let sel = selector(vec![], &[]);
        let result = sel.select(&intent(3, SelectionStrategy::FreeFirst), now()).unwrap();
        assert!(result.selected.is_empty());
        assert_eq!(result.shortfall(), Some((3, 0)));
    }

    // -- strategies -----------------------------------------------------------

    #[test]
    fn free_first_prefers_shared_nodes() {
        let mut trial = node(2, Some(TENANT));
        trial.trial = true;
        let sel = selector(vec![node(1, Some(TENANT)), trial, node(3, None)], &[1, 2, 3]);

        let result = sel.select(&intent(2, SelectionStrategy::FreeFirst), now()).unwrap();
        assert_eq!(result.selected, vec![2, 3]);
    }

    #[test]
    fn affinity_selects_previous_nodes_first() {
        let sel = selector(
            vec![node(1, None), node(2, None), node(3, Some(TENANT)), node(4, None)],
            &[1, 2, 3, 4],
        );
        let mut i = intent(3, SelectionStrategy::Affinity);
        i.last_exec_node_ids = vec![3, 4];

        let result = sel.select(&i, now()).unwrap();
        assert_eq!(result.selected, vec![3, 4, 1]);
    }

    #[test]
    fn affinity_skips_previous_nodes_that_went_offline() {
        let sel = selector(vec![node(1, None), node(2, None), node(3, None)], &[1, 2]);
        let mut i = intent(2, SelectionStrategy::Affinity);
        i.last_exec_node_ids = vec![3, 2];

        let result = sel.select(&i, now()).unwrap();
        assert_eq!(result.selected, vec![2, 1]);
    }

    #[test]
    fn round_robin_rotates_across_calls() {
        let sel = selector(vec![node(1, None), node(2, None), node(3, None)], &[1, 2, 3]);
        let i = intent(1, SelectionStrategy::RoundRobin);

        let picks: Vec<NodeId> = (0..4)
            .map(|_| sel.select(&i, now()).unwrap().selected[0])
            .collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
    }

    #[test]
    fn round_robin_takes_everything_when_pool_is_small() {
        let sel = selector(vec![node(1, None), node(2, None)], &[1, 2]);
        let i = intent(2, SelectionStrategy::RoundRobin);
        assert_eq!(sel.select(&i, now()).unwrap().selected, vec![1, 2]);
        assert_eq!(sel.select(&i, now()).unwrap().selected, vec![1, 2]);
    }

    #[test]
    fn random_is_reproducible_for_same_seed() {
        let nodes: Vec<Node> = (1..=10).map(|id| node(id, None)).collect();
        let online: Vec<NodeId> = (1..=10).collect();
        let sel = selector(nodes, &online);
        let i = intent(4, SelectionStrategy::Random { seed: 42 });

        let first = sel.select(&i, now()).unwrap().selected;
        let second = sel.select(&i, now()).unwrap().selected;
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert!(distinct(&first));
    }

    // -- properties -----------------------------------------------------------

    #[test]
    fn exact_count_from_eligible_pool_for_every_strategy() {
        let nodes: Vec<Node> = (1..=6)
            .map(|id| node(id, if id % 2 == 0 { Some(TENANT) } else { None }))
            .collect();
        let online: Vec<NodeId> = vec![1, 2, 3, 4, 5];
        let sel = selector(nodes, &online);
        let strategies = [
            SelectionStrategy::FreeFirst,
            SelectionStrategy::Affinity,
            SelectionStrategy::RoundRobin,
            SelectionStrategy::Random { seed: 7 },
        ];

        for strategy in strategies {
            for desired in 1..=7 {
                let mut i = intent(desired, strategy);
                i.last_exec_node_ids = vec![6, 2];
                let result = sel.select(&i, now()).unwrap();

                assert!(distinct(&result.selected), "{strategy:?} duplicated nodes");
                assert!(result.selected.iter().all(|id| online.contains(id)));
                if desired <= online.len() {
                    assert_eq!(result.selected.len(), desired, "{strategy:?}/{desired}");
                    assert!(result.is_complete());
                } else {
                    assert_eq!(result.selected.len(), online.len());
                    assert_eq!(result.shortfall(), Some((desired, online.len())));
                }
            }
        }
    }

    #[test]
    fn failure_reason_serializes_with_code() {
        let json = serde_json::to_value(SelectFailureReason::InsufficientNodes {
            requested: 3,
            available: 1,
        })
        .unwrap();
        assert_eq!(json["code"], "INSUFFICIENT_NODES");
        assert_eq!(json["requested"], 3);
    }
}
