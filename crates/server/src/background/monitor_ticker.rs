//! Periodic monitor firing.
//!
//! Every tick, monitors whose trigger time has arrived are fired through
//! the [`Orchestrator`] and immediately recomputed with the trigger time
//! as their last execution date. Executions run as their own tasks so a
//! slow broadcast never delays the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use testfleet_core::types::Timestamp;

use crate::engine::Orchestrator;
use crate::monitors::MonitorBook;

pub struct MonitorTicker {
    book: Arc<MonitorBook>,
    orchestrator: Arc<Orchestrator>,
    tick: Duration,
}

impl MonitorTicker {
    pub fn new(book: Arc<MonitorBook>, orchestrator: Arc<Orchestrator>, tick: Duration) -> Self {
        Self {
            book,
            orchestrator,
            tick,
        }
    }

    /// Run the ticker loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        tracing::info!(tick_secs = self.tick.as_secs(), "Monitor ticker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Monitor ticker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.fire_due(Utc::now());
                }
            }
        }
    }

    /// Fire every due monitor and recompute its next run. Returns the
    /// number of executions started.
    pub fn fire_due(&self, now: Timestamp) -> usize {
        let due = self.book.due(now);
        let mut fired = 0;

        for (monitor_id, entry) in due {
            let request = entry.execution_request(monitor_id);
            let orchestrator = Arc::clone(&self.orchestrator);
            tracing::info!(monitor_id, scheduled = %entry.next_run, "Firing monitor");

            tokio::spawn(async move {
                match orchestrator.execute(request, Utc::now()).await {
                    Ok(report) => tracing::info!(
                        monitor_id,
                        execution_id = %report.execution_id,
                        status = ?report.command.status,
                        "Monitor execution finished",
                    ),
                    Err(e) => tracing::warn!(monitor_id, error = %e, "Monitor execution failed"),
                }
            });
            fired += 1;

            if let Err(e) = self.book.complete(monitor_id, entry.next_run, now) {
                // Recompute cannot succeed later either; drop the monitor
                // rather than fire it every tick.
                tracing::error!(monitor_id, error = %e, "Failed to recompute monitor, removing");
                self.book.remove(monitor_id);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use testfleet_core::node::NodeRole;
    use testfleet_core::registry::NodeRegistry;
    use testfleet_core::schedule::{MonitorTimeSetting, PeriodUnit};
    use testfleet_core::selection::{ExecutionIntent, SelectionStrategy};
    use testfleet_dispatch::channel::AgentChannel;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::monitors::MonitorRegistration;

    fn ticker() -> (MonitorTicker, Arc<MonitorBook>) {
        let book = Arc::new(MonitorBook::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(AgentChannel::new()),
            Arc::new(OrchestratorConfig::default()),
        ));
        let ticker = MonitorTicker::new(Arc::clone(&book), orchestrator, Duration::from_secs(5));
        (ticker, book)
    }

    fn registration(time_setting: MonitorTimeSetting) -> MonitorRegistration {
        MonitorRegistration {
            time_setting,
            intent: ExecutionIntent {
                tenant_id: 1,
                script_id: "login-check".into(),
                desired: 1,
                candidate_node_ids: vec![],
                strategy: SelectionStrategy::FreeFirst,
                last_exec_node_ids: vec![],
                required_role: NodeRole::Execution,
            },
            params: serde_json::Value::Null,
            allow_partial: false,
            last_exec_date: None,
        }
    }

    #[tokio::test]
    async fn fires_due_monitors_and_reschedules() {
        let (ticker, book) = ticker();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let every_ten = MonitorTimeSetting {
            increment: Some(10),
            ..MonitorTimeSetting::periodically(PeriodUnit::EveryMinute)
        };
        book.register(1, registration(every_ten), now).unwrap();
        book.register(2, registration(MonitorTimeSetting::now()), now).unwrap();

        assert_eq!(ticker.fire_due(now), 2);
        assert_eq!(book.len(), 1);
        assert_eq!(book.get(1).unwrap().next_run, now + TimeDelta::minutes(10));

        // Nothing is due again until the next increment.
        assert_eq!(ticker.fire_due(now + TimeDelta::minutes(5)), 0);
    }

    #[tokio::test]
    async fn nothing_due_fires_nothing() {
        let (ticker, book) = ticker();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let daily = MonitorTimeSetting {
            time_of_day: chrono::NaiveTime::from_hms_opt(10, 0, 0),
            ..MonitorTimeSetting::periodically(PeriodUnit::Daily)
        };
        book.register(1, registration(daily), now).unwrap();
        assert_eq!(ticker.fire_due(now), 0);
    }
}
