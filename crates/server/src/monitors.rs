//! In-memory book of periodic monitors.
//!
//! Each monitor pairs a validated [`Schedule`] with the execution it runs.
//! The book only tracks trigger times; firing happens in
//! [`background::monitor_ticker`](crate::background::monitor_ticker).

use chrono::TimeDelta;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use testfleet_core::error::CoreError;
use testfleet_core::schedule::{MonitorTimeSetting, Schedule};
use testfleet_core::selection::{validate_intent, ExecutionIntent};
use testfleet_core::types::Timestamp;

use crate::engine::ExecutionRequest;

pub type MonitorId = i64;

/// Body of `PUT /monitors/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRegistration {
    pub time_setting: MonitorTimeSetting,
    pub intent: ExecutionIntent,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub allow_partial: bool,
    /// When the monitor last ran, as persisted by the caller.
    #[serde(default)]
    pub last_exec_date: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct MonitorEntry {
    pub registration: MonitorRegistration,
    pub schedule: Schedule,
    pub next_run: Timestamp,
}

impl MonitorEntry {
    /// The execution request this monitor fires.
    pub fn execution_request(&self, monitor_id: MonitorId) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: Some(format!("monitor-{monitor_id}-{}", self.next_run.timestamp())),
            intent: self.registration.intent.clone(),
            params: self.registration.params.clone(),
            allow_partial: self.registration.allow_partial,
        }
    }
}

/// Registered monitors keyed by id.
#[derive(Debug, Default)]
pub struct MonitorBook {
    entries: DashMap<MonitorId, MonitorEntry>,
}

impl MonitorBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a monitor and compute its first trigger time.
    ///
    /// Interval units without a previous run start counting from `now`,
    /// so they fire on the next tick.
    pub fn register(
        &self,
        monitor_id: MonitorId,
        registration: MonitorRegistration,
        now: Timestamp,
    ) -> Result<Timestamp, CoreError> {
        let schedule = Schedule::try_from(&registration.time_setting)?;
        validate_intent(&registration.intent)?;

        let base = match schedule {
            Schedule::EveryMinutes(_) | Schedule::EveryHours(_) => {
                Some(registration.last_exec_date.unwrap_or(now))
            }
            _ => registration.last_exec_date,
        };
        let next_run = schedule.next_run(base, now)?;

        self.entries.insert(
            monitor_id,
            MonitorEntry {
                registration,
                schedule,
                next_run,
            },
        );
        tracing::info!(monitor_id, %next_run, "Monitor registered");
        Ok(next_run)
    }

    pub fn remove(&self, monitor_id: MonitorId) -> bool {
        let removed = self.entries.remove(&monitor_id).is_some();
        if removed {
            tracing::info!(monitor_id, "Monitor removed");
        }
        removed
    }

    pub fn get(&self, monitor_id: MonitorId) -> Option<MonitorEntry> {
        self.entries.get(&monitor_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Monitors whose trigger time has arrived, ordered by trigger time.
    pub fn due(&self, now: Timestamp) -> Vec<(MonitorId, MonitorEntry)> {
        let mut due: Vec<(MonitorId, MonitorEntry)> = self
            .entries
            .iter()
            .filter(|e| e.next_run <= now)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        due.sort_by_key(|(id, e)| (e.next_run, *id));
        due
    }

    /// Record that a monitor fired at `fired_at` and compute its next
    /// trigger time. One-shot monitors are removed and yield `None`.
    pub fn complete(
        &self,
        monitor_id: MonitorId,
        fired_at: Timestamp,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, CoreError> {
        let Some(mut entry) = self.entries.get_mut(&monitor_id) else {
            return Ok(None);
        };

        if entry.schedule.is_one_shot() {
            drop(entry);
            self.entries.remove(&monitor_id);
            tracing::info!(monitor_id, "One-shot monitor fired and removed");
            return Ok(None);
        }

        // An interval monitor fired exactly at its trigger time must still
        // advance past it.
        let now = now.max(fired_at + TimeDelta::milliseconds(1));
        let next_run = entry.schedule.next_run(Some(fired_at), now)?;
        entry.registration.last_exec_date = Some(fired_at);
        entry.next_run = next_run;
        tracing::info!(monitor_id, %next_run, "Monitor recomputed");
        Ok(Some(next_run))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
