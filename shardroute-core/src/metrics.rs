//! Replica-target observability signal
//!
//! The target selector reports, per shard, whether the read-write target is a
//! genuine replica (`1`) or a fallback to the master (`0`). Recorders are
//! injected; the Prometheus-backed one registers into a registry owned by the
//! process entrypoint.

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

/// Sink for replica-target decisions
pub trait ReplicaTargetRecorder: Send + Sync {
    /// Overwrites the previous value for `(routing_config, shard)`
    fn record_replica_target(&self, routing_config: &str, shard: &str, genuine_replica: bool);
}

/// Discards every decision
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl ReplicaTargetRecorder for NoopRecorder {
    fn record_replica_target(&self, _routing_config: &str, _shard: &str, _genuine_replica: bool) {}
}

/// Gauge `shardroute_replica_target_active{routing_config, shard}`
#[derive(Clone)]
pub struct PrometheusRecorder {
    gauge: IntGaugeVec,
}

impl PrometheusRecorder {
    pub const METRIC_NAME: &'static str = "shardroute_replica_target_active";

    /// Create the gauge and register it into `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let gauge = IntGaugeVec::new(
            Opts::new(
                Self::METRIC_NAME,
                "1 if the read-write target of a shard is a replica, 0 if it fell back to the master",
            ),
            &["routing_config", "shard"],
        )?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(Self { gauge })
    }

    /// Current value for a shard; `0` for a shard never recorded
    #[must_use]
    pub fn value(&self, routing_config: &str, shard: &str) -> i64 {
        self.gauge.with_label_values(&[routing_config, shard]).get()
    }
}

impl ReplicaTargetRecorder for PrometheusRecorder {
    fn record_replica_target(&self, routing_config: &str, shard: &str, genuine_replica: bool) {
        self.gauge
            .with_label_values(&[routing_config, shard])
            .set(i64::from(genuine_replica));
    }
}

/// Render every metric of `registry` in the Prometheus text format
pub fn encode_text(registry: &Registry) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
