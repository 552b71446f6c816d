//! Shard: one master plus its replicas
//!
//! Owns the discovery protocol that reconciles what the monitor reports with
//! what each node says about itself, and the bootstrap protocol that assigns
//! initial roles to freshly provisioned nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{Error, Errors, Result};
use crate::monitor::MonitorClient;
use crate::node::{DiscoveryPolicy, DiscoveryState, Node, Role};
use crate::registry::ConnectionRegistry;
use crate::transport::RoleReply;

/// Default port data nodes listen on
pub const DEFAULT_NODE_PORT: u16 = 6379;

/// Replication sources meaning "no master assigned yet"
const UNASSIGNED_MASTER_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "::1"];

/// A logical partition. Nodes are unique by address and kept sorted by it.
#[derive(Debug)]
pub struct Shard {
    name: String,
    nodes: Vec<Node>,
    registry: Arc<ConnectionRegistry>,
}

impl Shard {
    /// Build from `alias -> connection URI` members
    pub fn new(
        name: impl Into<String>,
        members: &BTreeMap<String, String>,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        let nodes = members
            .iter()
            .map(|(alias, uri)| {
                Node::from_uri(Some(alias.clone()), uri, DEFAULT_NODE_PORT, Arc::clone(&registry))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_nodes(name, nodes, registry)
    }

    /// Build from plain `host:port` addresses
    pub fn from_addresses<I, S>(
        name: impl Into<String>,
        addresses: I,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes = addresses
            .into_iter()
            .map(|address| Node::new(address, None, Arc::clone(&registry)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_nodes(name, nodes, registry)
    }

    fn from_nodes(
        name: impl Into<String>,
        mut nodes: Vec<Node>,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        let name = name.into();
        if nodes.is_empty() {
            return Err(Error::Configuration(format!("shard '{name}' has no members")));
        }
        // Stable sort keeps the first alias seen for a duplicated address
        nodes.sort_by(|a, b| a.address().cmp(b.address()));
        nodes.dedup_by(|later, first| later.address() == first.address());

        Ok(Self {
            name,
            nodes,
            registry,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in address order
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, address: &str) -> Option<&Node> {
        self.position(address).ok().map(|idx| &self.nodes[idx])
    }

    fn position(&self, address: &str) -> std::result::Result<usize, usize> {
        self.nodes
            .binary_search_by(|node| node.address().cmp(address))
    }

    /// Index of the member with `address`, adding it if it is new
    fn resolve(&mut self, address: &str) -> Result<usize> {
        match self.position(address) {
            Ok(idx) => Ok(idx),
            Err(idx) => {
                let node = Node::new(address, None, Arc::clone(&self.registry))?;
                debug!(shard = %self.name, address = %address, "New shard member discovered");
                self.nodes.insert(idx, node);
                Ok(idx)
            }
        }
    }

    /// The single node confirmed as master in the last pass
    pub fn master(&self) -> Result<&Node> {
        let mut masters = self.nodes.iter().filter(|n| n.role() == Role::Master);
        match (masters.next(), masters.next()) {
            (Some(master), None) => Ok(master),
            _ => Err(Error::WrongMasterCount {
                shard: self.name.clone(),
                count: self.nodes.iter().filter(|n| n.role() == Role::Master).count(),
            }),
        }
    }

    /// Replicas confirmed in the last pass, in address order
    pub fn replicas(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role() == Role::Replica)
    }

    /// First confirmed replica qualifying as read-write target under `policy`
    #[must_use]
    pub fn replica_target(&self, policy: &DiscoveryPolicy) -> Option<&Node> {
        self.replicas()
            .find(|n| !policy.require_writable_replicas || n.writable() == Some(true))
    }

    /// Run one discovery pass.
    ///
    /// With a monitor, the monitor's view is corroborated by each node; without
    /// one every member reports its own role. `Err` means the master path
    /// failed and nothing about this shard can be trusted this pass. `Ok`
    /// carries replica failures, which only exclude the affected nodes.
    pub async fn discover(
        &mut self,
        monitor: Option<&MonitorClient>,
        policy: &DiscoveryPolicy,
        ctx: &CallContext,
    ) -> Result<Errors> {
        for node in &mut self.nodes {
            node.reset();
        }

        match monitor {
            Some(monitor) => self.discover_with_monitor(monitor, policy, ctx).await,
            None => self.discover_self_reported(policy, ctx).await,
        }
    }

    async fn discover_with_monitor(
        &mut self,
        monitor: &MonitorClient,
        policy: &DiscoveryPolicy,
        ctx: &CallContext,
    ) -> Result<Errors> {
        let reported = monitor.master(&self.name, ctx).await?;
        let master_address = reported.address();
        let idx = self.resolve(&master_address)?;
        let shard = self.name.clone();
        let master = &mut self.nodes[idx];

        if reported.flags.is_down() {
            master.set_state(DiscoveryState::Excluded);
            return Err(Error::convergence(
                shard,
                master_address,
                format!("monitor reports master as down ({})", reported.flags),
            ));
        }

        if let Err(e) = master.discover(policy, ctx).await {
            return Err(Error::convergence(
                shard,
                master_address,
                format!("monitor reports master, role query failed: {e}"),
            ));
        }
        if master.role() != Role::Master {
            let role = master.role();
            master.set_state(DiscoveryState::Failed);
            return Err(Error::convergence(
                shard,
                master_address,
                format!("monitor reports master, node reports {role}"),
            ));
        }

        if !policy.include_replicas {
            return Ok(Errors::new());
        }

        let mut errors = Errors::new();
        let reports = match monitor.replicas(&self.name, ctx).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(shard = %self.name, error = %e, "Failed to list replicas");
                errors.push(e);
                return Ok(errors);
            }
        };

        for report in reports {
            let address = report.address();
            if address == master_address {
                errors.push(Error::convergence(
                    &self.name,
                    address,
                    "monitor lists the master as its own replica",
                ));
                continue;
            }

            let idx = match self.resolve(&address) {
                Ok(idx) => idx,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let node = &mut self.nodes[idx];

            if report.flags.is_down() {
                node.set_state(DiscoveryState::Excluded);
                debug!(
                    shard = %self.name,
                    address = %address,
                    flags = %report.flags,
                    "Replica excluded: down-flagged by monitor"
                );
                continue;
            }

            match node.discover(policy, ctx).await {
                Err(e) => {
                    warn!(shard = %self.name, address = %address, error = %e, "Replica discovery failed");
                    errors.push(e);
                }
                Ok(()) if node.role() != Role::Replica => {
                    // A master claim stays confirmed so `master()` sees the split
                    let role = node.role();
                    warn!(
                        shard = %self.name,
                        address = %address,
                        role = %role,
                        "Monitor reports replica, node disagrees"
                    );
                    errors.push(Error::convergence(
                        &self.name,
                        address,
                        format!("monitor reports replica, node reports {role}"),
                    ));
                }
                Ok(()) => {}
            }
        }

        Ok(errors)
    }

    /// Every member reports its own role. Node failures only degrade the
    /// shard while some node still answers as master; otherwise they are the
    /// reason the master path failed.
    async fn discover_self_reported(
        &mut self,
        policy: &DiscoveryPolicy,
        ctx: &CallContext,
    ) -> Result<Errors> {
        let mut errors = Errors::new();
        for node in &mut self.nodes {
            if let Err(e) = node.discover(policy, ctx).await {
                warn!(
                    shard = %self.name,
                    node = %node.label(),
                    address = %node.address(),
                    error = %e,
                    "Node discovery failed"
                );
                errors.push(e);
            }
        }
        if !self.nodes.iter().any(|n| n.role() == Role::Master) {
            errors.into_result()?;
            return Ok(Errors::new());
        }
        Ok(errors)
    }

    /// Converge freshly provisioned nodes into one master and replicas.
    ///
    /// Nodes replicating from loopback are unassigned: the one at
    /// `master_index` is promoted, the rest attach to it. Nodes with a stable
    /// role are left alone, so a second call issues no commands. Returns the
    /// addresses of reconfigured nodes in processing order; on failure the
    /// error carries the changes already applied.
    pub async fn init(&mut self, master_index: usize, ctx: &CallContext) -> Result<Vec<String>> {
        let Some(designated) = self.nodes.get(master_index) else {
            return Err(Error::Configuration(format!(
                "master index {master_index} is out of range for shard '{}' ({} members)",
                self.name,
                self.nodes.len()
            )));
        };
        let master_host = designated.host().to_string();
        let master_port = designated.port();

        let mut changed = Vec::new();
        for idx in 0..self.nodes.len() {
            if let Err(e) = self
                .init_node(idx, master_index, &master_host, master_port, &mut changed, ctx)
                .await
            {
                return Err(Error::Bootstrap {
                    shard: self.name.clone(),
                    changed,
                    source: Box::new(e),
                });
            }
        }
        Ok(changed)
    }

    async fn init_node(
        &mut self,
        idx: usize,
        master_index: usize,
        master_host: &str,
        master_port: u16,
        changed: &mut Vec<String>,
        ctx: &CallContext,
    ) -> Result<()> {
        let node = &mut self.nodes[idx];

        match node.raw_role(ctx).await? {
            RoleReply::Replica { master_host: source, .. }
                if UNASSIGNED_MASTER_HOSTS.contains(&source.as_str()) =>
            {
                if idx == master_index {
                    node.promote(ctx).await?;
                    node.set_state(DiscoveryState::ConfirmedMaster);
                    info!(
                        shard = %self.name,
                        node = %node.label(),
                        address = %node.address(),
                        "Configured as master"
                    );
                } else {
                    node.attach_replica_of(master_host, master_port, ctx).await?;
                    node.set_state(DiscoveryState::ConfirmedReplica);
                    info!(
                        shard = %self.name,
                        node = %node.label(),
                        address = %node.address(),
                        master = %format!("{master_host}:{master_port}"),
                        "Configured as replica"
                    );
                }
                changed.push(node.address().to_string());
            }
            RoleReply::Replica { .. } => node.set_state(DiscoveryState::ConfirmedReplica),
            RoleReply::Master => node.set_state(DiscoveryState::ConfirmedMaster),
            RoleReply::Monitor => {
                return Err(Error::command(
                    node.address(),
                    "unable to get role: server is a monitor",
                ));
            }
        }
        Ok(())
    }
}
