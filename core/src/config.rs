use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConduitError, Result};

/// Runtime knobs shared by the pipeline, command and pub/sub components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Default wait bound for `CommandInvoker::invoke_command_default`
    pub command_timeout_ms: u64,
    /// Upper bound on concurrently running batch runs / subscriber deliveries
    pub max_concurrency: usize,
    /// Buffer size of the in-memory transport channel
    pub transport_capacity: usize,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            max_concurrency: 10,
            transport_capacity: 1024,
        }
    }
}

impl ConduitConfig {
    /// Defaults overlaid with `CONDUIT_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<u64>("CONDUIT_COMMAND_TIMEOUT_MS") {
            cfg.command_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("CONDUIT_MAX_CONCURRENCY") {
            cfg.max_concurrency = v;
        }
        if let Some(v) = env_parse::<usize>("CONDUIT_TRANSPORT_CAPACITY") {
            cfg.transport_capacity = v;
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(ConduitError::Config(
                "command_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConduitError::Config(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.transport_capacity == 0 {
            return Err(ConduitError::Config(
                "transport_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok().filter(|s| !s.is_empty())?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(target: "config", key = %key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: ConduitConfig = serde_json::from_str(r#"{"max_concurrency": 4}"#).unwrap();
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.command_timeout_ms, 30_000);
        assert_eq!(cfg.transport_capacity, 1024);
    }

    #[test]
    fn zero_values_are_rejected() {
        let cfg = ConduitConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConduitError::Config(_))));
        assert!(ConduitConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("CONDUIT_TRANSPORT_CAPACITY", "64");
        std::env::set_var("CONDUIT_COMMAND_TIMEOUT_MS", "not-a-number");
        let cfg = ConduitConfig::from_env();
        std::env::remove_var("CONDUIT_TRANSPORT_CAPACITY");
        std::env::remove_var("CONDUIT_COMMAND_TIMEOUT_MS");

        assert_eq!(cfg.transport_capacity, 64);
        assert_eq!(cfg.command_timeout_ms, 30_000);
    }
}
