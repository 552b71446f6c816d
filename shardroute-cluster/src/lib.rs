//! Topology discovery, role consistency, bootstrap and routing target
//! selection for sharded Redis deployments watched by sentinels.

pub mod cluster;
pub mod context;
pub mod error;
pub mod monitor;
pub mod node;
pub mod registry;
pub mod selector;
pub mod shard;
pub mod transport;

pub use cluster::Cluster;
pub use context::CallContext;
pub use error::{Error, ErrorClass, Errors, Result};
pub use monitor::MonitorClient;
pub use node::{DiscoveryPolicy, DiscoveryState, Node, Role};
pub use registry::ConnectionRegistry;
pub use selector::{RoutingMap, RoutingMaps, RoutingTarget, TargetKind, TargetSelector};
pub use shard::Shard;
pub use transport::{Connector, NodeConnection, RedisConnector, SharedConnection};
