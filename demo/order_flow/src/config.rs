use std::fs;
use std::path::Path;

use conduit_core::ConduitConfig;

/// High-level configuration for the Order Flow demo
#[derive(Clone, Debug)]
pub struct OrderFlowConfig {
    pub core: ConduitConfig,
    /// Topic the accepted orders are announced on
    pub order_topic: String,
    /// Fields an order must carry to enter the flow
    pub required_fields: Vec<String>,
    /// Number of synthetic orders to push through
    pub order_count: usize,
    /// Tax rate applied by the `calcTotal` command
    pub tax_rate: f64,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            // Core knobs already consider CONDUIT_* env vars
            core: ConduitConfig::from_env(),
            order_topic: std::env::var("ORDER_TOPIC").unwrap_or_else(|_| "orders".to_string()),
            required_fields: vec!["order_id".into(), "customer".into(), "price".into(), "qty".into()],
            order_count: std::env::var("ORDER_COUNT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(5),
            tax_rate: 0.2,
        }
    }
}

impl OrderFlowConfig {
    /// Load configuration from a TOML file (path via ORDER_FLOW_CONFIG or ./order_flow.toml),
    /// overlaying values onto defaults and env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("ORDER_FLOW_CONFIG").unwrap_or_else(|_| "order_flow.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "order_flow", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => Self::from_toml_str(&s, default),
            Err(e) => {
                tracing::warn!(target: "order_flow", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    fn from_toml_str(s: &str, default: Self) -> Self {
        match toml::from_str::<OrderFlowToml>(s) {
            Ok(t) => t.overlay(default),
            Err(e) => {
                tracing::warn!(target: "order_flow", error = %e, "Failed to parse TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct OrderFlowToml {
    pub order_topic: Option<String>,
    pub required_fields: Option<Vec<String>>,
    pub order_count: Option<usize>,
    pub tax_rate: Option<f64>,
    pub core: Option<CoreToml>,
}

impl OrderFlowToml {
    fn overlay(self, mut base: OrderFlowConfig) -> OrderFlowConfig {
        if let Some(x) = self.order_topic {
            base.order_topic = x;
        }
        if let Some(x) = self.required_fields {
            base.required_fields = x.into_iter().filter(|f| !f.is_empty()).collect();
        }
        if let Some(x) = self.order_count {
            base.order_count = x;
        }
        if let Some(x) = self.tax_rate {
            base.tax_rate = x.max(0.0);
        }
        if let Some(c) = self.core {
            c.apply(&mut base.core);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CoreToml {
    pub command_timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub transport_capacity: Option<usize>,
}

impl CoreToml {
    fn apply(self, c: &mut ConduitConfig) {
        if let Some(x) = self.command_timeout_ms {
            c.command_timeout_ms = x;
        }
        if let Some(x) = self.max_concurrency {
            c.max_concurrency = x;
        }
        if let Some(x) = self.transport_capacity {
            c.transport_capacity = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overlays_only_given_fields() {
        let base = OrderFlowConfig::default();
        let cfg = OrderFlowConfig::from_toml_str(
            r#"
order_topic = "checkout"
tax_rate = 0.1

[core]
max_concurrency = 2
"#,
            base.clone(),
        );

        assert_eq!(cfg.order_topic, "checkout");
        assert_eq!(cfg.tax_rate, 0.1);
        assert_eq!(cfg.core.max_concurrency, 2);
        assert_eq!(cfg.core.command_timeout_ms, base.core.command_timeout_ms);
        assert_eq!(cfg.required_fields, base.required_fields);
    }

    #[test]
    fn broken_toml_keeps_defaults() {
        let base = OrderFlowConfig::default();
        let cfg = OrderFlowConfig::from_toml_str("order_topic = [", base.clone());
        assert_eq!(cfg.order_topic, base.order_topic);
    }
}
