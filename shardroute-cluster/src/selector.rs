//! Routing target selection
//!
//! Turns a discovered cluster into routing maps: which node a proxy should
//! send a shard's traffic to.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use shardroute_core::config::{Config, RoutingTargets};
use shardroute_core::metrics::ReplicaTargetRecorder;
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::context::CallContext;
use crate::error::{Errors, Result};
use crate::node::{DiscoveryPolicy, Node};
use crate::shard::Shard;

/// Which routing maps a selection produces
pub type TargetKind = RoutingTargets;

/// Where a shard's traffic goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTarget {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl From<&Node> for RoutingTarget {
    fn from(node: &Node) -> Self {
        Self {
            address: node.address().to_string(),
            alias: node.alias().map(str::to_string),
        }
    }
}

/// Shard name to target, ordered by shard name
pub type RoutingMap = BTreeMap<String, RoutingTarget>;

/// Output of one selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingMaps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masters: Option<RoutingMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<RoutingMap>,
}

/// Builds routing maps for one named routing config
pub struct TargetSelector {
    routing_config: String,
    policy: DiscoveryPolicy,
    kind: TargetKind,
    recorder: Arc<dyn ReplicaTargetRecorder>,
}

impl std::fmt::Debug for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSelector")
            .field("routing_config", &self.routing_config)
            .field("policy", &self.policy)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl TargetSelector {
    #[must_use]
    pub fn new(
        routing_config: impl Into<String>,
        policy: DiscoveryPolicy,
        kind: TargetKind,
        recorder: Arc<dyn ReplicaTargetRecorder>,
    ) -> Self {
        Self {
            routing_config: routing_config.into(),
            policy,
            kind,
            recorder,
        }
    }

    /// Selector for the `routing` and `discovery` sections of `config`
    #[must_use]
    pub fn from_config(config: &Config, recorder: Arc<dyn ReplicaTargetRecorder>) -> Self {
        let policy = DiscoveryPolicy {
            include_replicas: config.discovery.include_replicas,
            require_writable_replicas: config.discovery.require_writable_replicas,
        };
        Self::new(config.routing.name.clone(), policy, config.routing.targets, recorder)
    }

    #[must_use]
    pub fn routing_config(&self) -> &str {
        &self.routing_config
    }

    #[must_use]
    pub const fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Policy a discovery pass needs to feed this selector.
    ///
    /// A masters-only selection never looks at replicas.
    #[must_use]
    pub const fn discovery_policy(&self) -> DiscoveryPolicy {
        match self.kind {
            RoutingTargets::Masters => DiscoveryPolicy::masters_only(),
            RoutingTargets::ReplicasWithFallback | RoutingTargets::Both => self.policy,
        }
    }

    /// The master of every shard. Any shard without exactly one master fails
    /// the whole map.
    pub fn masters(&self, cluster: &Cluster) -> Result<RoutingMap> {
        let mut map = RoutingMap::new();
        let mut errors = Errors::new();
        for shard in cluster.shards() {
            match shard.master() {
                Ok(master) => {
                    map.insert(shard.name().to_string(), RoutingTarget::from(master));
                }
                Err(e) => errors.push(e),
            }
        }
        errors.into_result()?;
        Ok(map)
    }

    /// A replica per shard, or the shard's master when no replica qualifies.
    ///
    /// Every decision is reported to the recorder: `true` for a genuine
    /// replica, `false` for a fallback.
    pub fn replicas_with_fallback(&self, cluster: &Cluster) -> Result<RoutingMap> {
        let mut map = RoutingMap::new();
        let mut errors = Errors::new();
        for shard in cluster.shards() {
            match self.replica_or_master(shard) {
                Ok(target) => {
                    map.insert(shard.name().to_string(), target);
                }
                Err(e) => errors.push(e),
            }
        }
        errors.into_result()?;
        Ok(map)
    }

    fn replica_or_master(&self, shard: &Shard) -> Result<RoutingTarget> {
        // A shard without exactly one master gets no route at all
        let master = shard.master()?;
        let (node, genuine) = match shard.replica_target(&self.policy) {
            Some(replica) => (replica, true),
            None => (master, false),
        };
        self.recorder
            .record_replica_target(&self.routing_config, shard.name(), genuine);
        if !genuine {
            debug!(
                routing_config = %self.routing_config,
                shard = %shard.name(),
                master = %node.address(),
                "No qualifying replica, falling back to master"
            );
        }
        Ok(RoutingTarget::from(node))
    }

    /// Maps for the configured target kind from the last discovery pass
    pub fn select(&self, cluster: &Cluster) -> Result<RoutingMaps> {
        let masters = match self.kind {
            RoutingTargets::Masters | RoutingTargets::Both => Some(self.masters(cluster)?),
            RoutingTargets::ReplicasWithFallback => None,
        };
        let replicas = match self.kind {
            RoutingTargets::ReplicasWithFallback | RoutingTargets::Both => {
                Some(self.replicas_with_fallback(cluster)?)
            }
            RoutingTargets::Masters => None,
        };
        Ok(RoutingMaps { masters, replicas })
    }

    /// Discover the cluster, then select.
    ///
    /// Degraded replicas do not fail the pass; they only push their shard
    /// towards a master fallback.
    pub async fn reconcile(&self, cluster: &mut Cluster, ctx: &CallContext) -> Result<RoutingMaps> {
        let degraded = cluster.discover(&self.discovery_policy(), ctx).await?;
        let maps = self.select(cluster)?;
        info!(
            routing_config = %self.routing_config,
            shards = cluster.shard_names().len(),
            degraded = degraded.len(),
            "Reconciliation pass complete"
        );
        Ok(maps)
    }
}
