//! Per-node dispatch outcomes and their batch summary.
//!
//! A pushed command settles into exactly one [`DispatchOutcome`] per
//! targeted node. Transport failures are values here, not errors: one
//! unreachable node never fails a batch. [`SimpleCommandResult::summarize`]
//! folds a batch into success / partial failure / failure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Which kind of agent command produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Run,
    Kill,
    PortCheck,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Run => "run",
            CommandKind::Kill => "kill",
            CommandKind::PortCheck => "port_check",
        }
    }

    /// Kill commands are best-effort: a lost reply says nothing about
    /// whether the remote process stopped.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, CommandKind::Kill)
    }
}

/// How one node's command settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The agent replied successfully; `payload` is the agent's reply body.
    Acknowledged { payload: serde_json::Value },
    /// No reply within the timeout.
    Timeout,
    /// No route to the node's agent (never connected or gone).
    Unreachable,
    /// Transport or agent-side error, with its text.
    Rejected { reason: String },
    /// The execution was cancelled locally while the command was in flight.
    /// Any late reply is discarded.
    Cancelled,
}

impl DispatchOutcome {
    pub fn acknowledged(payload: serde_json::Value) -> Self {
        DispatchOutcome::Acknowledged { payload }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        DispatchOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, DispatchOutcome::Acknowledged { .. })
    }

    /// Short label for logs and failure listings.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Acknowledged { .. } => "acknowledged",
            DispatchOutcome::Timeout => "timeout",
            DispatchOutcome::Unreachable => "unreachable",
            DispatchOutcome::Rejected { .. } => "rejected",
            DispatchOutcome::Cancelled => "cancelled",
        }
    }

    /// Human-readable failure reason, `None` when acknowledged.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            DispatchOutcome::Acknowledged { .. } => None,
            DispatchOutcome::Timeout => Some("timed out waiting for agent reply".to_string()),
            DispatchOutcome::Unreachable => Some("no route to agent".to_string()),
            DispatchOutcome::Rejected { reason } => Some(reason.clone()),
            DispatchOutcome::Cancelled => Some("cancelled before agent replied".to_string()),
        }
    }

    /// Whether this outcome leaves the remote effect of `kind` unknown
    /// (as opposed to a definite failure).
    pub fn is_unknown_for(&self, kind: CommandKind) -> bool {
        kind.is_best_effort()
            && matches!(
                self,
                DispatchOutcome::Timeout | DispatchOutcome::Unreachable | DispatchOutcome::Cancelled
            )
    }
}

// ---------------------------------------------------------------------------
// SimpleCommandResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Every targeted node acknowledged (vacuously true for no targets).
    Success,
    /// Some, but not all, nodes acknowledged.
    PartialFailure,
    /// No node acknowledged.
    Failure,
}

/// A node that did not acknowledge a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    /// Outcome label (`timeout`, `unreachable`, ...).
    pub outcome: String,
    pub reason: String,
    /// Set for best-effort commands whose remote effect cannot be known.
    /// Never to be read as success.
    pub outcome_unknown: bool,
}

/// Batch-level summary of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleCommandResult {
    pub command: CommandKind,
    pub status: CommandStatus,
    pub targeted: usize,
    pub acknowledged: Vec<NodeId>,
    pub failures: Vec<NodeFailure>,
}

impl SimpleCommandResult {
    /// Fold per-node outcomes into a batch summary. Node order follows
    /// the map (ascending id).
    pub fn summarize(command: CommandKind, outcomes: &BTreeMap<NodeId, DispatchOutcome>) -> Self {
        let mut acknowledged = Vec::new();
        let mut failures = Vec::new();

        for (&node_id, outcome) in outcomes {
            match outcome.failure_reason() {
                None => acknowledged.push(node_id),
                Some(reason) => failures.push(NodeFailure {
                    node_id,
                    outcome: outcome.label().to_string(),
                    reason,
                    outcome_unknown: outcome.is_unknown_for(command),
                }),
            }
        }

        let status = if failures.is_empty() {
            CommandStatus::Success
        } else if acknowledged.is_empty() {
            CommandStatus::Failure
        } else {
            CommandStatus::PartialFailure
        };

        Self {
            command,
            status,
            targeted: outcomes.len(),
            acknowledged,
            failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// Ids of nodes whose outcome is unknown (best-effort commands only).
    pub fn unknown_outcome_nodes(&self) -> Vec<NodeId> {
        self.failures
            .iter()
            .filter(|f| f.outcome_unknown)
            .map(|f| f.node_id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
