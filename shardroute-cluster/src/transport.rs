//! Wire-level access to data nodes and monitors
//!
//! `NodeConnection` is the command surface the engine needs from one server;
//! `Connector` creates connections for the registry. The Redis
//! implementations speak the native protocol through an auto-reconnecting
//! multiplexed connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, Value};
use shardroute_core::resilience::timeout::TimeoutConfig;
use tokio::time::timeout;
use url::Url;

use crate::error::{Error, Result};

/// Shared handle to one server connection
pub type SharedConnection = Arc<dyn NodeConnection>;

/// Role as reported by the server itself (`ROLE`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleReply {
    Master,
    Replica { master_host: String, master_port: u16 },
    Monitor,
}

/// Argument of a replica-reassignment command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaOf {
    /// Stop replicating and become a master
    NoOne,
    Master { host: String, port: u16 },
}

/// Monitor-reported down indicators and other per-node flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthFlags(Vec<String>);

impl HealthFlags {
    const SUBJECTIVELY_DOWN: &'static str = "s_down";
    const OBJECTIVELY_DOWN: &'static str = "o_down";

    /// Parse a comma or whitespace separated flag list
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    #[must_use]
    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|f| f == flag)
    }

    /// Subjectively or objectively down
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.contains(Self::SUBJECTIVELY_DOWN) || self.contains(Self::OBJECTIVELY_DOWN)
    }
}

impl fmt::Display for HealthFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// One member of a shard as the monitor sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub host: String,
    pub port: u16,
    pub flags: HealthFlags,
}

impl MonitorReport {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, flags: &str) -> Self {
        Self {
            host: host.into(),
            port,
            flags: HealthFlags::parse(flags),
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }

    /// Build from the field map of a `SENTINEL MASTER`/`SENTINEL SLAVES` entry
    pub fn from_fields(source: &str, fields: &HashMap<String, String>) -> Result<Self> {
        let host = fields
            .get("ip")
            .ok_or_else(|| Error::command(source, "monitor reply is missing 'ip'"))?;
        let port = fields
            .get("port")
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| Error::command(source, "monitor reply has no valid 'port'"))?;
        let flags = fields.get("flags").map(String::as_str).unwrap_or_default();

        Ok(Self::new(host.clone(), port, flags))
    }
}

/// Commands the engine issues against a single server
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn role(&self) -> Result<RoleReply>;

    async fn replica_of(&self, target: ReplicaOf) -> Result<()>;

    async fn config_get(&self, parameter: &str) -> Result<Option<String>>;

    async fn ping(&self) -> Result<()>;

    /// `None` when the monitor does not know the shard
    async fn monitor_master(&self, shard: &str) -> Result<Option<MonitorReport>>;

    async fn monitor_replicas(&self, shard: &str) -> Result<Vec<MonitorReport>>;

    async fn monitor_add(&self, shard: &str, host: &str, port: u16, quorum: u32) -> Result<()>;
}

/// Opens connections for the registry
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<SharedConnection>;
}

/// `host:port`, with brackets around IPv6 hosts
#[must_use]
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Split `host:port` (or `[v6]:port`) into its parts
pub fn split_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Configuration(format!("address '{address}' has no port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Configuration(format!("address '{address}' has an invalid port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::Configuration(format!("address '{address}' has no host")));
    }
    Ok((host.to_string(), port))
}

/// Turn a `redis://host[:port]` URI into a node address
pub fn address_from_uri(uri: &str, default_port: u16) -> Result<String> {
    let url = Url::parse(uri)
        .map_err(|e| Error::Configuration(format!("invalid connection uri '{uri}': {e}")))?;
    let host = match url.host() {
        Some(url::Host::Domain(domain)) => domain.to_string(),
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        None => {
            return Err(Error::Configuration(format!(
                "connection uri '{uri}' has no host"
            )))
        }
    };
    Ok(format_address(&host, url.port().unwrap_or(default_port)))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Decode a `ROLE` reply
pub fn parse_role_reply(address: &str, reply: &Value) -> Result<RoleReply> {
    let Value::Array(items) = reply else {
        return Err(Error::command(address, format!("unexpected ROLE reply: {reply:?}")));
    };
    let role = items.first().and_then(value_to_string).unwrap_or_default();

    match role.as_str() {
        "master" => Ok(RoleReply::Master),
        "slave" | "replica" => {
            let master_host = items.get(1).and_then(value_to_string).ok_or_else(|| {
                Error::command(address, "ROLE reply has no master host")
            })?;
            let master_port = items
                .get(2)
                .and_then(value_to_string)
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| Error::command(address, "ROLE reply has no master port"))?;
            Ok(RoleReply::Replica {
                master_host,
                master_port,
            })
        }
        "sentinel" => Ok(RoleReply::Monitor),
        other => Err(Error::command(address, format!("unknown role '{other}'"))),
    }
}

fn classify_redis_error(address: &str, err: &redis::RedisError) -> Error {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        Error::unreachable(address, err)
    } else {
        Error::command(address, err)
    }
}

/// Redis connection to one data node or monitor
pub struct RedisConnection {
    address: String,
    conn: ConnectionManager,
}

impl RedisConnection {
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error(&self.address, &e))
    }
}

#[async_trait]
impl NodeConnection for RedisConnection {
    async fn role(&self) -> Result<RoleReply> {
        let reply: Value = self.query(&redis::cmd("ROLE")).await?;
        parse_role_reply(&self.address, &reply)
    }

    async fn replica_of(&self, target: ReplicaOf) -> Result<()> {
        let mut cmd = redis::cmd("SLAVEOF");
        match target {
            ReplicaOf::NoOne => cmd.arg("NO").arg("ONE"),
            ReplicaOf::Master { host, port } => cmd.arg(host).arg(port),
        };
        self.query::<()>(&cmd).await
    }

    async fn config_get(&self, parameter: &str) -> Result<Option<String>> {
        let reply: Vec<String> = self.query(redis::cmd("CONFIG").arg("GET").arg(parameter)).await?;
        Ok(reply.into_iter().nth(1))
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::command(&self.address, format!("unexpected PING reply '{reply}'")))
        }
    }

    async fn monitor_master(&self, shard: &str) -> Result<Option<MonitorReport>> {
        let reply: Result<HashMap<String, String>> =
            self.query(redis::cmd("SENTINEL").arg("MASTER").arg(shard)).await;
        match reply {
            Ok(fields) => MonitorReport::from_fields(&self.address, &fields).map(Some),
            Err(Error::Command { reason, .. }) if reason.contains("No such master") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn monitor_replicas(&self, shard: &str) -> Result<Vec<MonitorReport>> {
        let reply: Vec<HashMap<String, String>> =
            self.query(redis::cmd("SENTINEL").arg("SLAVES").arg(shard)).await?;
        reply
            .iter()
            .map(|fields| MonitorReport::from_fields(&self.address, fields))
            .collect()
    }

    async fn monitor_add(&self, shard: &str, host: &str, port: u16, quorum: u32) -> Result<()> {
        self.query::<()>(
            redis::cmd("SENTINEL")
                .arg("MONITOR")
                .arg(shard)
                .arg(host)
                .arg(port)
                .arg(quorum),
        )
        .await
    }
}

/// Opens `RedisConnection`s
#[derive(Debug, Clone, Default)]
pub struct RedisConnector {
    password: Option<String>,
    timeouts: TimeoutConfig,
}

impl RedisConnector {
    #[must_use]
    pub fn new(password: Option<String>, timeouts: TimeoutConfig) -> Self {
        Self { password, timeouts }
    }

    fn connection_url(&self, address: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("redis://{address}"))
            .map_err(|e| Error::Configuration(format!("invalid address '{address}': {e}")))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password.as_str()))
                .map_err(|()| Error::Configuration(format!("cannot set password for '{address}'")))?;
        }
        Ok(url)
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, address: &str) -> Result<SharedConnection> {
        let url = self.connection_url(address)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::Configuration(format!("invalid address '{address}': {e}")))?;

        let conn = timeout(self.timeouts.connect, client.get_connection_manager())
            .await
            .map_err(|_| Error::unreachable(address, "connection timed out"))?
            .map_err(|e| Error::unreachable(address, e))?;

        tracing::debug!(address = %address, "Connection established");

        Ok(Arc::new(RedisConnection {
            address: address.to_string(),
            conn,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_role_master() {
        let reply = Value::Array(vec![bulk("master"), Value::Int(3129659), Value::Array(vec![])]);
        assert_eq!(parse_role_reply("a:1", &reply).unwrap(), RoleReply::Master);
    }

    #[test]
    fn test_parse_role_replica() {
        let reply = Value::Array(vec![
            bulk("slave"),
            bulk("127.0.0.1"),
            Value::Int(6379),
            bulk("connected"),
            Value::Int(3167038),
        ]);
        assert_eq!(
            parse_role_reply("a:1", &reply).unwrap(),
            RoleReply::Replica {
                master_host: "127.0.0.1".to_string(),
                master_port: 6379
            }
        );
    }

    #[test]
    fn test_parse_role_rejects_garbage() {
        assert!(parse_role_reply("a:1", &Value::Nil).is_err());
        let reply = Value::Array(vec![bulk("slave"), bulk("10.0.0.1")]);
        assert!(parse_role_reply("a:1", &reply).is_err());
        let reply = Value::Array(vec![bulk("sentinel"), Value::Array(vec![])]);
        assert_eq!(parse_role_reply("a:1", &reply).unwrap(), RoleReply::Monitor);
    }

    #[test]
    fn test_health_flags() {
        assert!(HealthFlags::parse("s_down,slave").is_down());
        assert!(HealthFlags::parse("master o_down").is_down());
        assert!(!HealthFlags::parse("slave,disconnected").is_down());
        assert!(!HealthFlags::parse("").is_down());
        assert_eq!(HealthFlags::parse("master, s_down").to_string(), "master,s_down");
    }

    #[test]
    fn test_monitor_report_from_fields() {
        let fields = HashMap::from([
            ("ip".to_string(), "10.0.0.2".to_string()),
            ("port".to_string(), "6379".to_string()),
            ("flags".to_string(), "slave".to_string()),
        ]);
        let report = MonitorReport::from_fields("s:26379", &fields).unwrap();
        assert_eq!(report.address(), "10.0.0.2:6379");
        assert!(!report.flags.is_down());

        let missing = HashMap::from([("ip".to_string(), "10.0.0.2".to_string())]);
        assert!(MonitorReport::from_fields("s:26379", &missing).is_err());
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(split_address("10.0.0.1:6379").unwrap(), ("10.0.0.1".to_string(), 6379));
        assert_eq!(split_address("[::1]:6380").unwrap(), ("::1".to_string(), 6380));
        assert!(split_address("10.0.0.1").is_err());
        assert!(split_address(":6379").is_err());
        assert_eq!(format_address("::1", 6379), "[::1]:6379");

        assert_eq!(address_from_uri("redis://redis-0:6380", 6379).unwrap(), "redis-0:6380");
        assert_eq!(address_from_uri("redis://10.0.0.1", 26379).unwrap(), "10.0.0.1:26379");
        assert!(address_from_uri("not a uri", 6379).is_err());
    }

    #[test]
    fn test_connection_url_with_password() {
        let connector = RedisConnector::new(Some("p@ss".to_string()), TimeoutConfig::default());
        let url = connector.connection_url("10.0.0.1:6379").unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.1"));
        assert_eq!(url.port(), Some(6379));
        assert!(url.password().is_some());
    }
}
