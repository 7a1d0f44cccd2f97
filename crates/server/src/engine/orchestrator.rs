//! Execution orchestration: select, broadcast, merge.
//!
//! [`Orchestrator::execute`] is the request-driven unit of work behind
//! `POST /executions` and the monitor ticker. It picks nodes with the
//! [`NodeSelector`], pushes one run command per node through the
//! [`AgentChannel`], then folds the settled outcomes into a command summary
//! and a merged [`ExecutionDetail`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use testfleet_core::outcome::{CommandKind, DispatchOutcome, SimpleCommandResult};
use testfleet_core::registry::NodeRegistry;
use testfleet_core::sample::{self, ExecutionDetail};
use testfleet_core::selection::{ExecutionIntent, NodeSelector, SelectionResult};
use testfleet_core::types::{NodeId, Timestamp};
use testfleet_dispatch::channel::AgentChannel;
use testfleet_dispatch::protocol::AgentRequest;
use testfleet_dispatch::router::RouteKey;

use crate::config::OrchestratorConfig;
use crate::error::{AppError, AppResult};

/// Body of `POST /executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Caller-assigned id; generated when absent.
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(flatten)]
    pub intent: ExecutionIntent,
    /// Passed through to the agent's runner untouched.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Run on fewer nodes than desired instead of failing.
    #[serde(default)]
    pub allow_partial: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub selection: SelectionResult,
    pub command: SimpleCommandResult,
    pub detail: ExecutionDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillReport {
    pub execution_id: String,
    /// Whether an in-flight execution was cancelled in this process.
    pub cancelled_locally: bool,
    pub command: SimpleCommandResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortCheckReport {
    pub node_id: NodeId,
    pub port: u16,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

pub struct Orchestrator {
    registry: Arc<NodeRegistry>,
    selector: NodeSelector,
    channel: Arc<AgentChannel>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<NodeRegistry>,
        channel: Arc<AgentChannel>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        let selector = NodeSelector::new(Arc::clone(&registry), config.stale_after());
        Self {
            registry,
            selector,
            channel,
            config,
        }
    }

    /// Select nodes, run the script on all of them and merge the output.
    ///
    /// Fails before any dispatch on configuration errors, and with
    /// [`AppError::InsufficientCapacity`] on a short pool unless the request
    /// allows a partial (non-empty) allocation.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        now: Timestamp,
    ) -> AppResult<ExecutionReport> {
        let selection = self.selector.select(&request.intent, now)?;
        let partial_ok = request.allow_partial && !selection.selected.is_empty();
        if !selection.is_complete() && !partial_ok {
            return Err(AppError::InsufficientCapacity(selection));
        }

        let execution_id = request
            .execution_id
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let routes = self.routes_for(&selection.selected);
        let run = AgentRequest::Run {
            execution_id: execution_id.clone(),
            script_id: request.intent.script_id.clone(),
            params: request.params,
        };

        tracing::info!(
            %execution_id,
            tenant_id = request.intent.tenant_id,
            script_id = %request.intent.script_id,
            nodes = ?selection.selected,
            "Starting execution",
        );

        let tracking = self.channel.track_execution(&execution_id);
        let outcomes = self
            .channel
            .broadcast(&routes, &run, self.config.dispatch_timeout())
            .await;
        drop(tracking);

        let command = SimpleCommandResult::summarize(CommandKind::Run, &outcomes);
        let detail = sample::merge(&outcomes, self.config.max_merged_log_bytes);

        tracing::info!(
            %execution_id,
            status = ?command.status,
            acknowledged = command.acknowledged.len(),
            failed = command.failures.len(),
            "Execution settled",
        );

        Ok(ExecutionReport {
            execution_id,
            selection,
            command,
            detail,
        })
    }

    /// Cancel an execution locally, then ask its nodes to kill the runner.
    ///
    /// Kill is best-effort: nodes that time out or are unreachable are
    /// reported with an unknown outcome, never as stopped.
    pub async fn kill(&self, execution_id: &str, node_ids: &[NodeId]) -> KillReport {
        let cancelled_locally = self.channel.cancel_execution(execution_id);
        let routes = self.routes_for(node_ids);
        let kill = AgentRequest::Kill {
            execution_id: execution_id.to_string(),
        };
        let outcomes = self
            .channel
            .broadcast(&routes, &kill, self.config.kill_timeout())
            .await;
        let command = SimpleCommandResult::summarize(CommandKind::Kill, &outcomes);

        let unknown = command.unknown_outcome_nodes();
        if !unknown.is_empty() {
            tracing::warn!(execution_id, nodes = ?unknown, "Kill outcome unknown on some nodes");
        }

        KillReport {
            execution_id: execution_id.to_string(),
            cancelled_locally,
            command,
        }
    }

    /// Ask one node's agent whether `port` is free.
    pub async fn port_check(&self, node_id: NodeId, port: u16) -> AppResult<PortCheckReport> {
        let node = self.registry.require(node_id)?;
        let outcome = self
            .channel
            .dispatch(
                RouteKey::new(node.tenant_id, node.id),
                AgentRequest::PortCheck { port },
                self.config.dispatch_timeout(),
            )
            .await;
        Ok(PortCheckReport {
            node_id,
            port,
            outcome,
        })
    }

    /// Route keys for `node_ids`. Nodes missing from the inventory are
    /// addressed as shared-pool agents and resolve as unreachable if no
    /// such agent is connected.
    fn routes_for(&self, node_ids: &[NodeId]) -> Vec<RouteKey> {
        node_ids
            .iter()
            .map(|&id| {
                let tenant_id = self.registry.get(id).and_then(|n| n.tenant_id);
                RouteKey::new(tenant_id, id)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
