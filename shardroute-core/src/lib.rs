pub mod config;
pub mod logging;
pub mod metrics;
pub mod resilience;

pub use config::Config;
pub use metrics::{NoopRecorder, PrometheusRecorder, ReplicaTargetRecorder};
