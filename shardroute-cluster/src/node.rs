//! A single data node

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::transport::{self, ReplicaOf, RoleReply, SharedConnection};

/// Config parameter read to decide whether a replica accepts writes
const READ_ONLY_PARAMETER: &str = "slave-read-only";

/// Role of a node, `Unknown` unless corroborated during the current pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Unknown,
    Master,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Master => "master",
            Self::Replica => "slave",
        })
    }
}

/// Where a node stands in the current discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryState {
    #[default]
    Unconfirmed,
    ConfirmedMaster,
    ConfirmedReplica,
    /// Down-flagged by the monitor; skipped this pass
    Excluded,
    /// Probe failed or contradicted the monitor
    Failed,
}

impl DiscoveryState {
    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::ConfirmedMaster => Role::Master,
            Self::ConfirmedReplica => Role::Replica,
            Self::Unconfirmed | Self::Excluded | Self::Failed => Role::Unknown,
        }
    }
}

/// What a discovery pass looks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    /// Also discover replicas (masters are always discovered)
    pub include_replicas: bool,
    /// Replicas must report `slave-read-only no` to qualify as targets
    pub require_writable_replicas: bool,
}

impl DiscoveryPolicy {
    #[must_use]
    pub const fn masters_only() -> Self {
        Self {
            include_replicas: false,
            require_writable_replicas: false,
        }
    }

    #[must_use]
    pub const fn with_replicas() -> Self {
        Self {
            include_replicas: true,
            require_writable_replicas: false,
        }
    }

    #[must_use]
    pub const fn with_writable_replicas() -> Self {
        Self {
            include_replicas: true,
            require_writable_replicas: true,
        }
    }
}

/// One server of a shard
pub struct Node {
    address: String,
    host: String,
    port: u16,
    alias: Option<String>,
    state: DiscoveryState,
    writable: Option<bool>,
    registry: Arc<ConnectionRegistry>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("alias", &self.alias)
            .field("state", &self.state)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node for `address` (`host:port`)
    pub fn new(
        address: impl Into<String>,
        alias: Option<String>,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        let address = address.into();
        let (host, port) = transport::split_address(&address)?;
        Ok(Self {
            address,
            host,
            port,
            alias,
            state: DiscoveryState::Unconfirmed,
            writable: None,
            registry,
        })
    }

    /// Create a node from a `redis://host[:port]` connection URI
    pub fn from_uri(
        alias: Option<String>,
        uri: &str,
        default_port: u16,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        Self::new(transport::address_from_uri(uri, default_port)?, alias, registry)
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Alias if present, otherwise the address
    #[must_use]
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.address)
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.state.role()
    }

    #[must_use]
    pub const fn state(&self) -> DiscoveryState {
        self.state
    }

    /// `Some(true)` when the replica accepts writes; `None` if never checked
    #[must_use]
    pub const fn writable(&self) -> Option<bool> {
        self.writable
    }

    pub(crate) fn set_state(&mut self, state: DiscoveryState) {
        self.state = state;
    }

    pub(crate) fn reset(&mut self) {
        self.state = DiscoveryState::Unconfirmed;
        self.writable = None;
    }

    /// Run `f` with this node's connection under the context's deadline
    pub(crate) async fn call<T, F, Fut>(&self, ctx: &CallContext, f: F) -> Result<T>
    where
        F: FnOnce(SharedConnection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        ctx.run(&self.address, async {
            let conn = self.registry.get(&self.address).await?;
            f(conn).await
        })
        .await
    }

    /// Ask the node what it is
    pub async fn raw_role(&self, ctx: &CallContext) -> Result<RoleReply> {
        self.call(ctx, |conn| async move { conn.role().await }).await
    }

    /// Query the node's own role and record it.
    ///
    /// On any failure the node ends up `Failed` (role `Unknown`).
    pub async fn discover(&mut self, policy: &DiscoveryPolicy, ctx: &CallContext) -> Result<()> {
        self.reset();

        let result = self.probe(policy, ctx).await;
        match result {
            Ok((state, writable)) => {
                self.state = state;
                self.writable = writable;
                debug!(address = %self.address, role = %self.role(), "Node discovered");
                Ok(())
            }
            Err(e) => {
                self.state = DiscoveryState::Failed;
                Err(e)
            }
        }
    }

    async fn probe(
        &self,
        policy: &DiscoveryPolicy,
        ctx: &CallContext,
    ) -> Result<(DiscoveryState, Option<bool>)> {
        match self.raw_role(ctx).await? {
            RoleReply::Master => Ok((DiscoveryState::ConfirmedMaster, None)),
            RoleReply::Replica { .. } => {
                let writable = if policy.require_writable_replicas {
                    let read_only = self
                        .call(ctx, |conn| async move {
                            conn.config_get(READ_ONLY_PARAMETER).await
                        })
                        .await?;
                    Some(read_only.as_deref() == Some("no"))
                } else {
                    None
                };
                Ok((DiscoveryState::ConfirmedReplica, writable))
            }
            RoleReply::Monitor => Err(Error::command(
                &self.address,
                "server is a monitor, not a data node",
            )),
        }
    }

    /// Make the node a master
    pub async fn promote(&self, ctx: &CallContext) -> Result<()> {
        self.call(ctx, |conn| async move { conn.replica_of(ReplicaOf::NoOne).await })
            .await
    }

    /// Make the node replicate from `host:port`
    pub async fn attach_replica_of(&self, host: &str, port: u16, ctx: &CallContext) -> Result<()> {
        let target = ReplicaOf::Master {
            host: host.to_string(),
            port,
        };
        self.call(ctx, |conn| async move { conn.replica_of(target).await })
            .await
    }

    /// Reachability probe
    pub async fn ping(&self, ctx: &CallContext) -> Result<()> {
        self.call(ctx, |conn| async move { conn.ping().await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_role_mapping() {
        assert_eq!(DiscoveryState::ConfirmedMaster.role(), Role::Master);
        assert_eq!(DiscoveryState::ConfirmedReplica.role(), Role::Replica);
        assert_eq!(DiscoveryState::Excluded.role(), Role::Unknown);
        assert_eq!(DiscoveryState::Failed.role(), Role::Unknown);
        assert_eq!(DiscoveryState::default().role(), Role::Unknown);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Replica.to_string(), "slave");
        assert_eq!(Role::default().to_string(), "unknown");
    }

    #[test]
    fn test_policy_presets() {
        assert!(!DiscoveryPolicy::masters_only().include_replicas);
        assert!(DiscoveryPolicy::with_replicas().include_replicas);
        assert!(DiscoveryPolicy::with_writable_replicas().require_writable_replicas);
    }
}
