//! Connection registry
//!
//! Keyed cache of live connections, shared by every shard of a cluster and
//! reused across reconciliation passes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::transport::{Connector, SharedConnection};

/// Hands out one connection per address, creating it on first use.
///
/// Concurrent first use of an address performs a single connection setup;
/// the other callers wait for it. A failed setup is not cached: the next
/// caller, waiting or new, tries again. Entries are never evicted implicitly.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    connections: DashMap<String, Arc<OnceCell<SharedConnection>>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: DashMap::new(),
        }
    }

    /// Connection for `address`
    pub async fn get(&self, address: &str) -> Result<SharedConnection> {
        // Clone the cell out so no map lock is held across the connect
        let cell = self
            .connections
            .entry(address.to_string())
            .or_default()
            .value()
            .clone();

        let conn = cell
            .get_or_try_init(|| async {
                debug!(address = %address, "Opening connection");
                self.connector.connect(address).await
            })
            .await?;

        Ok(Arc::clone(conn))
    }

    /// Whether a live connection exists for `address`
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.connections
            .get(address)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
