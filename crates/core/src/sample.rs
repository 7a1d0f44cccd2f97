//! Merging per-node run output into one execution detail view.
//!
//! An acknowledged run reply carries a [`RunReport`] (the agent's samples);
//! every other [`DispatchOutcome`] becomes an [`ErrorCause`]. The merged
//! [`ExecutionDetail`] keeps samples in node-then-time order, concatenates
//! log output under a byte budget, and buckets failures so callers can tell
//! "the test failed" apart from "the infrastructure failed to run it".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outcome::DispatchOutcome;
use crate::types::{NodeId, Timestamp};

/// Default cap for the merged log view (64 KiB).
pub const DEFAULT_MAX_LOG_BYTES: usize = 64 * 1024;

/// Appended to the log view once the budget is exhausted.
pub const TRUNCATION_MARKER: &str = "\n[log truncated]\n";

// ---------------------------------------------------------------------------
// Agent-reported samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Passed,
    /// The script ran and an assertion failed.
    Failed,
    /// The runner itself failed (crash, bad script, missing dependency).
    Errored,
}

/// Body of one sample: structured rows or raw log text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecSampleContent {
    Rows { rows: Vec<serde_json::Value> },
    Log { text: String },
}

/// Output of one run step on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecSample {
    pub status: SampleStatus,
    pub started_at: Timestamp,
    #[serde(default)]
    pub duration_ms: u64,
    pub content: ExecSampleContent,
    /// Assertion or runner message for non-passing samples.
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of an acknowledged run reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default)]
    pub samples: Vec<ExecSample>,
}

// ---------------------------------------------------------------------------
// Merged view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCauseKind {
    /// No route to the agent, or the transport rejected the command.
    Connection,
    Timeout,
    Cancelled,
    /// The reply payload was not a valid run report.
    Malformed,
    Runner,
    Assertion,
}

impl ErrorCauseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCauseKind::Connection => "connection",
            ErrorCauseKind::Timeout => "timeout",
            ErrorCauseKind::Cancelled => "cancelled",
            ErrorCauseKind::Malformed => "malformed",
            ErrorCauseKind::Runner => "runner",
            ErrorCauseKind::Assertion => "assertion",
        }
    }

    /// Everything except an assertion failure means the test never got a
    /// fair run.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, ErrorCauseKind::Assertion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    pub node_id: NodeId,
    pub kind: ErrorCauseKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSample {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub sample: ExecSample,
}

/// Caller-visible result of one execution across all its nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetail {
    /// Ordered by node id, then by sample start time.
    pub samples: Vec<NodeSample>,
    pub log: String,
    pub log_truncated: bool,
    pub error_causes: Vec<ErrorCause>,
}

impl ExecutionDetail {
    pub fn has_infrastructure_failure(&self) -> bool {
        self.error_causes.iter().any(|c| c.kind.is_infrastructure())
    }

    pub fn has_test_failure(&self) -> bool {
        self.error_causes
            .iter()
            .any(|c| c.kind == ErrorCauseKind::Assertion)
    }

    /// Number of causes per bucket.
    pub fn cause_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for cause in &self.error_causes {
            *counts.entry(cause.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incrementally folds node outcomes into an [`ExecutionDetail`].
///
/// Outcomes may be pushed in any order as they settle. Samples are sorted
/// on [`finish`](Self::finish); log sections appear in push order.
#[derive(Debug)]
pub struct ExecutionDetailBuilder {
    max_log_bytes: usize,
    detail: ExecutionDetail,
}

impl Default for ExecutionDetailBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_BYTES)
    }
}

impl ExecutionDetailBuilder {
    pub fn new(max_log_bytes: usize) -> Self {
        Self {
            max_log_bytes,
            detail: ExecutionDetail::default(),
        }
    }

    pub fn push(&mut self, node_id: NodeId, outcome: &DispatchOutcome) {
        let payload = match outcome {
            DispatchOutcome::Acknowledged { payload } => payload,
            DispatchOutcome::Timeout => {
                return self.cause(node_id, ErrorCauseKind::Timeout, "no reply before timeout");
            }
            DispatchOutcome::Unreachable => {
                return self.cause(node_id, ErrorCauseKind::Connection, "no route to agent");
            }
            DispatchOutcome::Rejected { reason } => {
                return self.cause(node_id, ErrorCauseKind::Connection, reason);
            }
            DispatchOutcome::Cancelled => {
                return self.cause(node_id, ErrorCauseKind::Cancelled, "execution cancelled");
            }
        };

        let report = match serde_json::from_value::<RunReport>(payload.clone()) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(node_id, error = %e, "Malformed run report");
                return self.cause(
                    node_id,
                    ErrorCauseKind::Malformed,
                    &format!("invalid run report: {e}"),
                );
            }
        };

        let mut header_written = false;
        for sample in report.samples {
            match sample.status {
                SampleStatus::Passed => {}
                SampleStatus::Failed => self.cause(
                    node_id,
                    ErrorCauseKind::Assertion,
                    sample.message.as_deref().unwrap_or("assertion failed"),
                ),
                SampleStatus::Errored => self.cause(
                    node_id,
                    ErrorCauseKind::Runner,
                    sample.message.as_deref().unwrap_or("runner error"),
                ),
            }
            if let ExecSampleContent::Log { text } = &sample.content {
                if !header_written {
                    self.append_log(&format!("== node {node_id} ==\n"));
                    header_written = true;
                }
                self.append_log(text);
                if !text.ends_with('\n') {
                    self.append_log("\n");
                }
            }
            self.detail.samples.push(NodeSample { node_id, sample });
        }
    }

    pub fn finish(mut self) -> ExecutionDetail {
        // Stable sort keeps agent order for samples with equal start times.
        self.detail
            .samples
            .sort_by_key(|s| (s.node_id, s.sample.started_at));
        self.detail.error_causes.sort_by_key(|c| c.node_id);
        self.detail
    }

    fn cause(&mut self, node_id: NodeId, kind: ErrorCauseKind, message: &str) {
        self.detail.error_causes.push(ErrorCause {
            node_id,
            kind,
            message: message.to_string(),
        });
    }

    fn append_log(&mut self, text: &str) {
        if self.detail.log_truncated {
            return;
        }
        let remaining = self.max_log_bytes.saturating_sub(self.detail.log.len());
        if text.len() <= remaining {
            self.detail.log.push_str(text);
            return;
        }
        let mut cut = remaining;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.detail.log.push_str(&text[..cut]);
        self.detail.log.push_str(TRUNCATION_MARKER);
        self.detail.log_truncated = true;
    }
}

/// Merge a settled broadcast into one detail view, nodes in ascending id.
pub fn merge(
    outcomes: &BTreeMap<NodeId, DispatchOutcome>,
    max_log_bytes: usize,
) -> ExecutionDetail {
    let mut builder = ExecutionDetailBuilder::new(max_log_bytes);
    for (&node_id, outcome) in outcomes {
        builder.push(node_id, outcome);
    }
    builder.finish()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
