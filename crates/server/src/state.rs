use std::sync::Arc;

use testfleet_core::registry::NodeRegistry;
use testfleet_dispatch::channel::AgentChannel;

use crate::config::OrchestratorConfig;
use crate::engine::Orchestrator;
use crate::monitors::MonitorBook;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (all inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    /// Node inventory and liveness.
    pub registry: Arc<NodeRegistry>,
    /// Agent connections, pending replies and execution cancellation.
    pub channel: Arc<AgentChannel>,
    pub orchestrator: Arc<Orchestrator>,
    /// Periodic monitors fired by the monitor ticker.
    pub monitors: Arc<MonitorBook>,
}

impl AppState {
    /// Build fresh, empty state around `config`.
    pub fn new(config: OrchestratorConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(NodeRegistry::new());
        let channel = Arc::new(AgentChannel::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&channel),
            Arc::clone(&config),
        ));

        Self {
            config,
            registry,
            channel,
            orchestrator,
            monitors: Arc::new(MonitorBook::new()),
        }
    }
}
