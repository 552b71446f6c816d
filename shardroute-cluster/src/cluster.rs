//! A named collection of shards watched by zero or more monitors

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use shardroute_core::config::{TopologyConfig, MONITOR_GROUP};
use tracing::{debug, error, warn};

use crate::context::CallContext;
use crate::error::{Error, Errors, Result};
use crate::monitor::{MonitorClient, DEFAULT_MONITOR_PORT};
use crate::node::{DiscoveryPolicy, Node};
use crate::registry::ConnectionRegistry;
use crate::shard::Shard;

/// Shards keyed by name, built once from a topology and re-discovered on
/// every pass
#[derive(Debug)]
pub struct Cluster {
    shards: BTreeMap<String, Shard>,
    monitors: Vec<MonitorClient>,
    registry: Arc<ConnectionRegistry>,
}

impl Cluster {
    /// Build from `group -> alias -> uri`; the `sentinel` group lists monitors
    pub fn from_topology(topology: &TopologyConfig, registry: Arc<ConnectionRegistry>) -> Result<Self> {
        let mut shards = BTreeMap::new();
        let mut monitors = Vec::new();

        for (group, members) in topology {
            if group == MONITOR_GROUP {
                for (alias, uri) in members {
                    let node = Node::from_uri(
                        Some(alias.clone()),
                        uri,
                        DEFAULT_MONITOR_PORT,
                        Arc::clone(&registry),
                    )?;
                    monitors.push(MonitorClient::new(node));
                }
            } else {
                let shard = Shard::new(group.clone(), members, Arc::clone(&registry))?;
                shards.insert(group.clone(), shard);
            }
        }

        if shards.is_empty() {
            return Err(Error::Configuration("topology contains no shards".to_string()));
        }
        monitors.sort_by(|a, b| a.address().cmp(b.address()));

        Ok(Self {
            shards,
            monitors,
            registry,
        })
    }

    #[must_use]
    pub fn shard(&self, name: &str) -> Option<&Shard> {
        self.shards.get(name)
    }

    /// Shard names in sorted order
    #[must_use]
    pub fn shard_names(&self) -> Vec<&str> {
        self.shards.keys().map(String::as_str).collect()
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    #[must_use]
    pub fn monitors(&self) -> &[MonitorClient] {
        &self.monitors
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Find a data node by address in any shard
    #[must_use]
    pub fn node(&self, address: &str) -> Option<&Node> {
        self.shards.values().find_map(|shard| shard.node(address))
    }

    /// First monitor answering a ping.
    ///
    /// `Ok(None)` only when no monitors are configured; configured monitors
    /// that are all unreachable are an error, never a silent switch to
    /// self-reported discovery.
    pub async fn monitor(&self, ctx: &CallContext) -> Result<Option<&MonitorClient>> {
        Self::healthy_monitor(&self.monitors, ctx).await
    }

    async fn healthy_monitor<'a>(
        monitors: &'a [MonitorClient],
        ctx: &CallContext,
    ) -> Result<Option<&'a MonitorClient>> {
        if monitors.is_empty() {
            return Ok(None);
        }

        let mut failures = Vec::new();
        for monitor in monitors {
            match monitor.ping(ctx).await {
                Ok(()) => return Ok(Some(monitor)),
                Err(e) => {
                    debug!(monitor = %monitor.address(), error = %e, "Monitor not healthy");
                    failures.push(e.to_string());
                }
            }
        }
        Err(Error::unreachable(
            monitors
                .iter()
                .map(MonitorClient::address)
                .collect::<Vec<_>>()
                .join(","),
            format!("no healthy monitor: {}", failures.join("; ")),
        ))
    }

    /// Discover every shard concurrently.
    ///
    /// A shard whose master path fails is reported in the `Err`; replica
    /// failures are logged and returned in the `Ok` without failing the pass.
    pub async fn discover(&mut self, policy: &DiscoveryPolicy, ctx: &CallContext) -> Result<Errors> {
        let monitor = Self::healthy_monitor(&self.monitors, ctx).await?;
        if let Some(monitor) = monitor {
            debug!(monitor = %monitor.address(), "Discovering through monitor");
        }

        let results = join_all(self.shards.values_mut().map(|shard| async move {
            let result = shard.discover(monitor, policy, ctx).await;
            (shard.name().to_string(), result)
        }))
        .await;

        let mut fatal = Errors::new();
        let mut degraded = Errors::new();
        for (name, result) in results {
            match result {
                Ok(errors) => {
                    if !errors.is_empty() {
                        warn!(shard = %name, errors = %errors, "Shard discovered with degraded replicas");
                    }
                    degraded.extend(errors.into_iter().map(|e| e.in_shard(&name)));
                }
                Err(e) => {
                    error!(shard = %name, error = %e, "Shard discovery failed");
                    fatal.push(e.in_shard(name));
                }
            }
        }

        fatal.into_result()?;
        Ok(degraded)
    }

    /// Bootstrap every shard. Returns the reconfigured node addresses.
    pub async fn init(&mut self, master_index: usize, ctx: &CallContext) -> Result<Vec<String>> {
        let mut all_changed = Vec::new();
        for shard in self.shards.values_mut() {
            match shard.init(master_index, ctx).await {
                Ok(changed) => all_changed.extend(changed),
                Err(Error::Bootstrap {
                    shard: name,
                    changed,
                    source,
                }) => {
                    all_changed.extend(changed);
                    return Err(Error::Bootstrap {
                        shard: name,
                        changed: all_changed,
                        source,
                    });
                }
                Err(e) => return Err(e.in_shard(shard.name())),
            }
        }
        Ok(all_changed)
    }

    /// Register every shard with every monitor that does not know it yet.
    /// Returns `monitor/shard` pairs that were added.
    pub async fn ensure_monitored(&self, quorum: u32, ctx: &CallContext) -> Result<Vec<String>> {
        let mut changed = Vec::new();
        for monitor in &self.monitors {
            for shard in self.shards.values() {
                if monitor
                    .ensure_monitored(shard, quorum, ctx)
                    .await
                    .map_err(|e| e.in_shard(shard.name()))?
                {
                    changed.push(format!("{}/{}", monitor.address(), shard.name()));
                }
            }
        }
        Ok(changed)
    }
}
