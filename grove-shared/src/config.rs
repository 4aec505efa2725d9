//! Cluster configuration.
//!
//! Loaded in layers: a base TOML file, environment-specific overrides, then
//! `GROVE_`-prefixed environment variables on top, via the `config` crate.
//! Every field carries a sensible default so a bare `NodeConfig::default()`
//! (or an empty TOML file) is already a valid single-node configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4369
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_heartbeat_miss_threshold() -> u32 {
    3
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_backoff_multiplier() -> f64 {
    1.5
}

fn default_call_timeout_ms() -> u64 {
    5000
}

/// Cluster-wide node configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Local node identifier (the `name` half of `name@host:port`). Required.
    pub node_name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// `name@host:port` strings to dial on startup.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// HMAC key for the handshake. `None` means accept all peers.
    #[serde(default)]
    pub cluster_secret: Option<String>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_miss_threshold")]
    pub heartbeat_miss_threshold: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    #[serde(default = "default_reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: f64,

    /// Default `call` timeout when a caller does not specify one.
    #[serde(default = "default_call_timeout_ms")]
    pub default_call_timeout_ms: u64,
}

impl NodeConfig {
    /// Construct the minimal valid config: just a node name, everything else
    /// defaulted.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Self::default_with_empty_name()
        }
    }

    fn default_with_empty_name() -> Self {
        Self {
            node_name: String::new(),
            host: default_host(),
            port: default_port(),
            seeds: Vec::new(),
            cluster_secret: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_miss_threshold: default_heartbeat_miss_threshold(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            reconnect_backoff_multiplier: default_reconnect_backoff_multiplier(),
            default_call_timeout_ms: default_call_timeout_ms(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }

    /// Load configuration from an optional base file, an optional
    /// environment-specific override file, and `GROVE_`-prefixed env vars,
    /// in that order of increasing precedence.
    pub fn load(base_path: Option<&str>, env_path: Option<&str>) -> crate::GroveResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = base_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        if let Some(path) = env_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("GROVE").separator("__"));
        let built = builder.build()?;
        let config: NodeConfig = built.try_deserialize()?;
        Ok(config)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("node")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_match_spec_table() {
        let config = NodeConfig::new("alpha");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4369);
        assert!(config.seeds.is_empty());
        assert!(config.cluster_secret.is_none());
        assert_eq!(config.heartbeat_interval_ms, 5000);
        assert_eq!(config.heartbeat_miss_threshold, 3);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert_eq!(config.max_reconnect_delay_ms, 30_000);
        assert_eq!(config.reconnect_backoff_multiplier, 1.5);
    }

    #[test]
    fn load_applies_env_override() {
        std::env::set_var("GROVE__NODE_NAME", "from-env");
        std::env::set_var("GROVE__PORT", "5555");
        let config = NodeConfig::load(None, None).unwrap();
        assert_eq!(config.node_name, "from-env");
        assert_eq!(config.port, 5555);
        std::env::remove_var("GROVE__NODE_NAME");
        std::env::remove_var("GROVE__PORT");
    }
}
