//! Quorum monitor (sentinel) client

use tracing::info;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::shard::Shard;
use crate::transport::MonitorReport;

/// Default port monitors listen on
pub const DEFAULT_MONITOR_PORT: u16 = 26379;

/// A node acting as a quorum monitor.
///
/// Reports the monitor's authoritative view of each shard it watches.
#[derive(Debug)]
pub struct MonitorClient {
    node: Node,
}

impl MonitorClient {
    #[must_use]
    pub const fn new(node: Node) -> Self {
        Self { node }
    }

    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.node.address()
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<()> {
        self.node.ping(ctx).await
    }

    /// The master the monitor currently reports for `shard`.
    ///
    /// A shard the monitor does not know yet is a convergence error.
    pub async fn master(&self, shard: &str, ctx: &CallContext) -> Result<MonitorReport> {
        self.node
            .call(ctx, |conn| async move { conn.monitor_master(shard).await })
            .await?
            .ok_or_else(|| Error::convergence(shard, self.address(), "shard is not monitored"))
    }

    /// The replicas the monitor currently reports for `shard`
    pub async fn replicas(&self, shard: &str, ctx: &CallContext) -> Result<Vec<MonitorReport>> {
        self.node
            .call(ctx, |conn| async move { conn.monitor_replicas(shard).await })
            .await
    }

    /// Start monitoring `shard` with its current master if the monitor does
    /// not know it yet. Returns whether the monitor was changed.
    pub async fn ensure_monitored(
        &self,
        shard: &Shard,
        quorum: u32,
        ctx: &CallContext,
    ) -> Result<bool> {
        let name = shard.name();
        let known = self
            .node
            .call(ctx, |conn| async move { conn.monitor_master(name).await })
            .await?;
        if known.is_some() {
            return Ok(false);
        }

        let master = shard.master()?;
        let (host, port) = (master.host(), master.port());
        self.node
            .call(ctx, |conn| async move {
                conn.monitor_add(name, host, port, quorum).await
            })
            .await?;

        info!(
            monitor = %self.address(),
            shard = %name,
            master = %master.address(),
            quorum,
            "Shard registered with monitor"
        );
        Ok(true)
    }
}
