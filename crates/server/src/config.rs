use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use testfleet_core::error::CoreError;
use testfleet_core::liveness::DEFAULT_STALE_AFTER_SECS;
use testfleet_core::sample::DEFAULT_MAX_LOG_BYTES;

/// Orchestrator configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3100`).
    pub port: u16,
    /// A node without a heartbeat for this long is offline.
    pub node_stale_after_secs: i64,
    /// Reply timeout for run and port-check commands.
    pub dispatch_timeout_secs: u64,
    /// Reply timeout for kill commands.
    pub kill_timeout_secs: u64,
    pub monitor_tick_secs: u64,
    pub liveness_sweep_secs: u64,
    /// Byte budget of the merged log in an execution detail.
    pub max_merged_log_bytes: usize,
    /// HTTP request timeout in seconds (default: `30`). Routes that wait
    /// on agents are bounded by the dispatch timeouts instead.
    pub request_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3100,
            node_stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            dispatch_timeout_secs: 30,
            kill_timeout_secs: 10,
            monitor_tick_secs: 5,
            liveness_sweep_secs: 30,
            max_merged_log_bytes: DEFAULT_MAX_LOG_BYTES,
            request_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default   |
    /// |-------------------------|-----------|
    /// | `HOST`                  | `0.0.0.0` |
    /// | `PORT`                  | `3100`    |
    /// | `NODE_STALE_AFTER_SECS` | `60`      |
    /// | `DISPATCH_TIMEOUT_SECS` | `30`      |
    /// | `KILL_TIMEOUT_SECS`     | `10`      |
    /// | `MONITOR_TICK_SECS`     | `5`       |
    /// | `LIVENESS_SWEEP_SECS`   | `30`      |
    /// | `MAX_MERGED_LOG_BYTES`  | `65536`   |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`      |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let env = &lookup;
        let d = Self::default();
        let config = Self {
            host: lookup("HOST").unwrap_or(d.host),
            port: parse_var(env, "PORT", d.port)?,
            node_stale_after_secs: parse_var(
                env,
                "NODE_STALE_AFTER_SECS",
                d.node_stale_after_secs,
            )?,
            dispatch_timeout_secs: parse_var(
                env,
                "DISPATCH_TIMEOUT_SECS",
                d.dispatch_timeout_secs,
            )?,
            kill_timeout_secs: parse_var(env, "KILL_TIMEOUT_SECS", d.kill_timeout_secs)?,
            monitor_tick_secs: parse_var(env, "MONITOR_TICK_SECS", d.monitor_tick_secs)?,
            liveness_sweep_secs: parse_var(env, "LIVENESS_SWEEP_SECS", d.liveness_sweep_secs)?,
            max_merged_log_bytes: parse_var(env, "MAX_MERGED_LOG_BYTES", d.max_merged_log_bytes)?,
            request_timeout_secs: parse_var(env, "REQUEST_TIMEOUT_SECS", d.request_timeout_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("NODE_STALE_AFTER_SECS", u64::try_from(self.node_stale_after_secs).unwrap_or(0)),
            ("DISPATCH_TIMEOUT_SECS", self.dispatch_timeout_secs),
            ("KILL_TIMEOUT_SECS", self.kill_timeout_secs),
            ("MONITOR_TICK_SECS", self.monitor_tick_secs),
            ("LIVENESS_SWEEP_SECS", self.liveness_sweep_secs),
            ("REQUEST_TIMEOUT_SECS", self.request_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn stale_after(&self) -> TimeDelta {
        TimeDelta::seconds(self.node_stale_after_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_secs(self.monitor_tick_secs)
    }

    pub fn liveness_sweep(&self) -> Duration {
        Duration::from_secs(self.liveness_sweep_secs)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}
