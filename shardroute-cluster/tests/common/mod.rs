//! In-memory transport for integration tests
//!
//! A `FakeNetwork` holds the state of every simulated server. Data nodes
//! answer `ROLE`, apply replica reassignments and report `slave-read-only`;
//! monitors report the shards they watch. Reconfiguration commands are logged
//! so tests can assert exactly what was sent.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shardroute_cluster::transport::{
    split_address, MonitorReport, NodeConnection, ReplicaOf, RoleReply,
};
use shardroute_cluster::{ConnectionRegistry, Connector, Error, Result, SharedConnection};

#[derive(Debug, Clone)]
struct DataNode {
    role: RoleReply,
    read_only: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Monitor {
    shards: HashMap<String, (MonitorReport, Vec<MonitorReport>)>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, DataNode>,
    monitors: HashMap<String, Monitor>,
    down: Vec<String>,
    commands: Vec<String>,
    connects: HashMap<String, usize>,
}

/// Shared simulated network; clones see the same servers
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<State>>,
    connect_delay: Option<Duration>,
}

fn report(address: &str, flags: &str) -> MonitorReport {
    let (host, port) = split_address(address).unwrap();
    MonitorReport::new(host, port, flags)
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection setup sleeps this long first
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(Arc::new(self.clone())))
    }

    pub fn add_master(&self, address: &str) -> &Self {
        self.state.lock().nodes.insert(
            address.to_string(),
            DataNode {
                role: RoleReply::Master,
                read_only: None,
            },
        );
        self
    }

    pub fn add_replica(&self, address: &str, master: &str) -> &Self {
        let (master_host, master_port) = split_address(master).unwrap();
        self.state.lock().nodes.insert(
            address.to_string(),
            DataNode {
                role: RoleReply::Replica {
                    master_host,
                    master_port,
                },
                read_only: Some("yes".to_string()),
            },
        );
        self
    }

    pub fn set_read_only(&self, address: &str, value: &str) -> &Self {
        if let Some(node) = self.state.lock().nodes.get_mut(address) {
            node.read_only = Some(value.to_string());
        }
        self
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) -> &Self {
        let mut state = self.state.lock();
        state.down.retain(|a| a != address);
        if !reachable {
            state.down.push(address.to_string());
        }
        self
    }

    pub fn add_monitor(&self, address: &str) -> &Self {
        self.state
            .lock()
            .monitors
            .insert(address.to_string(), Monitor::default());
        self
    }

    /// Make `monitor` report `master` and `replicas` (address, flags) for `shard`
    pub fn watch(
        &self,
        monitor: &str,
        shard: &str,
        master: (&str, &str),
        replicas: &[(&str, &str)],
    ) -> &Self {
        let mut state = self.state.lock();
        let entry = state.monitors.entry(monitor.to_string()).or_default();
        entry.shards.insert(
            shard.to_string(),
            (
                report(master.0, master.1),
                replicas.iter().map(|(a, f)| report(a, f)).collect(),
            ),
        );
        self
    }

    pub fn role_of(&self, address: &str) -> Option<RoleReply> {
        self.state.lock().nodes.get(address).map(|n| n.role.clone())
    }

    /// Reconfiguration commands sent so far, as `address COMMAND args`
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn connects(&self, address: &str) -> usize {
        self.state.lock().connects.get(address).copied().unwrap_or(0)
    }

    /// Shards a monitor watches and their masters
    pub fn monitored(&self, monitor: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .monitors
            .get(monitor)
            .map(|m| {
                m.shards
                    .iter()
                    .map(|(shard, (master, _))| (shard.clone(), master.address()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_down(&self, address: &str) -> bool {
        self.state.lock().down.iter().any(|a| a == address)
    }
}

#[async_trait]
impl Connector for FakeNetwork {
    async fn connect(&self, address: &str) -> Result<SharedConnection> {
        *self
            .state
            .lock()
            .connects
            .entry(address.to_string())
            .or_default() += 1;

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let known = {
            let state = self.state.lock();
            state.nodes.contains_key(address) || state.monitors.contains_key(address)
        };
        if !known || self.is_down(address) {
            return Err(Error::unreachable(address, "connection refused"));
        }

        Ok(Arc::new(FakeConnection {
            address: address.to_string(),
            network: self.clone(),
        }))
    }
}

struct FakeConnection {
    address: String,
    network: FakeNetwork,
}

impl FakeConnection {
    fn check(&self) -> Result<()> {
        if self.network.is_down(&self.address) {
            return Err(Error::unreachable(&self.address, "connection reset"));
        }
        Ok(())
    }

    fn with_monitor<T>(&self, f: impl FnOnce(&mut Monitor) -> T) -> Result<T> {
        self.check()?;
        let mut state = self.network.state.lock();
        let monitor = state
            .monitors
            .get_mut(&self.address)
            .ok_or_else(|| Error::command(&self.address, "ERR unknown command 'SENTINEL'"))?;
        Ok(f(monitor))
    }
}

#[async_trait]
impl NodeConnection for FakeConnection {
    async fn role(&self) -> Result<RoleReply> {
        self.check()?;
        let state = self.network.state.lock();
        if state.monitors.contains_key(&self.address) {
            return Ok(RoleReply::Monitor);
        }
        state
            .nodes
            .get(&self.address)
            .map(|n| n.role.clone())
            .ok_or_else(|| Error::unreachable(&self.address, "no such server"))
    }

    async fn replica_of(&self, target: ReplicaOf) -> Result<()> {
        self.check()?;
        let mut state = self.network.state.lock();
        let (role, command) = match target {
            ReplicaOf::NoOne => (RoleReply::Master, "SLAVEOF NO ONE".to_string()),
            ReplicaOf::Master { host, port } => {
                let command = format!("SLAVEOF {host} {port}");
                (
                    RoleReply::Replica {
                        master_host: host,
                        master_port: port,
                    },
                    command,
                )
            }
        };
        let node = state
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| Error::command(&self.address, "not a data node"))?;
        node.role = role;
        state.commands.push(format!("{} {command}", self.address));
        Ok(())
    }

    async fn config_get(&self, parameter: &str) -> Result<Option<String>> {
        self.check()?;
        let state = self.network.state.lock();
        Ok(match parameter {
            "slave-read-only" => state
                .nodes
                .get(&self.address)
                .and_then(|n| n.read_only.clone()),
            _ => None,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn monitor_master(&self, shard: &str) -> Result<Option<MonitorReport>> {
        self.with_monitor(|m| m.shards.get(shard).map(|(master, _)| master.clone()))
    }

    async fn monitor_replicas(&self, shard: &str) -> Result<Vec<MonitorReport>> {
        let address = self.address.clone();
        self.with_monitor(|m| m.shards.get(shard).map(|(_, replicas)| replicas.clone()))?
            .ok_or_else(|| Error::command(address, "ERR No such master with that name"))
    }

    async fn monitor_add(&self, shard: &str, host: &str, port: u16, quorum: u32) -> Result<()> {
        self.with_monitor(|m| {
            m.shards.insert(
                shard.to_string(),
                (MonitorReport::new(host, port, "master"), Vec::new()),
            );
        })?;
        self.network.state.lock().commands.push(format!(
            "{} SENTINEL MONITOR {shard} {host} {port} {quorum}",
            self.address
        ));
        Ok(())
    }
}

/// `group -> alias -> redis://address` topology from plain addresses
pub fn topology(groups: &[(&str, &[&str])]) -> BTreeMap<String, BTreeMap<String, String>> {
    groups
        .iter()
        .map(|(group, addresses)| {
            let members = addresses
                .iter()
                .enumerate()
                .map(|(i, address)| (format!("{group}-{i}"), format!("redis://{address}")))
                .collect();
            (group.to_string(), members)
        })
        .collect()
}
