use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Group name in the topology that lists monitor (sentinel) endpoints
pub const MONITOR_GROUP: &str = "sentinel";

/// Topology description: group name -> alias -> connection URI
pub type TopologyConfig = BTreeMap<String, BTreeMap<String, String>>;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub redis: RedisConfig,
    pub discovery: DiscoveryConfig,
    pub routing: RoutingConfig,
    pub bootstrap: BootstrapConfig,
    pub topology: TopologyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            password: None,
            connect_timeout_secs: 5,
        }
    }
}

/// Discovery pass scheduling and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seconds between reconciliation passes
    pub interval_secs: u64,
    /// Deadline for every single node call
    pub timeout_ms: u64,
    pub include_replicas: bool,
    /// Only replicas with `slave-read-only no` qualify as read-write targets
    pub require_writable_replicas: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_ms: 2000,
            include_replicas: true,
            require_writable_replicas: false,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which routing maps a pass produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTargets {
    Masters,
    ReplicasWithFallback,
    #[default]
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Identifier of the generated routing config, used as a metric label
    pub name: String,
    pub targets: RoutingTargets,
    /// Where to write the routing maps as JSON (stdout if unset)
    pub output_path: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            targets: RoutingTargets::Both,
            output_path: None,
        }
    }
}

/// One-time role assignment for freshly provisioned shards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub enabled: bool,
    pub master_index: usize,
    /// Quorum used when registering shards with the monitors
    pub quorum: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            master_index: 0,
            quorum: 2,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (SHARDROUTE_DISCOVERY__TIMEOUT_MS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("SHARDROUTE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.discovery.interval_secs == 0 {
            errors.push("discovery.interval_secs must be greater than 0".to_string());
        }
        if self.discovery.timeout_ms == 0 {
            errors.push("discovery.timeout_ms must be greater than 0".to_string());
        }
        if self.discovery.require_writable_replicas && !self.discovery.include_replicas {
            errors.push(
                "discovery.require_writable_replicas needs discovery.include_replicas".to_string(),
            );
        }
        if self.routing.name.trim().is_empty() {
            errors.push("routing.name must not be empty".to_string());
        }
        if self.routing.targets != RoutingTargets::Masters && !self.discovery.include_replicas {
            errors.push(format!(
                "routing.targets {:?} needs discovery.include_replicas",
                self.routing.targets
            ));
        }

        let shard_groups: Vec<_> = self
            .topology
            .iter()
            .filter(|(group, _)| group.as_str() != MONITOR_GROUP)
            .collect();
        if shard_groups.is_empty() {
            errors.push("topology must contain at least one shard".to_string());
        }
        for (group, members) in &shard_groups {
            if members.is_empty() {
                errors.push(format!("topology shard '{group}' has no members"));
            }
            if self.bootstrap.enabled && self.bootstrap.master_index >= members.len() {
                errors.push(format!(
                    "bootstrap.master_index {} is out of range for shard '{group}' ({} members)",
                    self.bootstrap.master_index,
                    members.len()
                ));
            }
        }
        if self.monitor_endpoints().is_some_and(BTreeMap::is_empty) {
            errors.push(format!("topology group '{MONITOR_GROUP}' has no members"));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }
        if self.bootstrap.enabled && self.bootstrap.quorum == 0 {
            errors.push("bootstrap.quorum must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Monitor endpoints listed in the topology, if any
    #[must_use]
    pub fn monitor_endpoints(&self) -> Option<&BTreeMap<String, String>> {
        self.topology.get(MONITOR_GROUP)
    }
}
