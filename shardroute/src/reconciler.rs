//! Reconciliation loop: discover, select, publish

use std::time::Duration;

use anyhow::{Context, Result};
use shardroute_cluster::{CallContext, Cluster, RoutingMaps, TargetSelector};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where routing maps are published
#[derive(Debug, Clone)]
pub enum Output {
    Stdout,
    File(String),
}

impl Output {
    #[must_use]
    pub fn from_path(path: Option<&str>) -> Self {
        path.map_or(Self::Stdout, |p| Self::File(p.to_string()))
    }

    /// Write `maps` as pretty JSON
    pub async fn publish(&self, maps: &RoutingMaps) -> Result<()> {
        let json = serde_json::to_string_pretty(maps)?;
        match self {
            Self::Stdout => println!("{json}"),
            Self::File(path) => {
                // Write then rename so readers never see a partial file
                let tmp = format!("{path}.tmp");
                tokio::fs::write(&tmp, json.as_bytes())
                    .await
                    .with_context(|| format!("writing {tmp}"))?;
                tokio::fs::rename(&tmp, path)
                    .await
                    .with_context(|| format!("replacing {path}"))?;
            }
        }
        Ok(())
    }
}

pub struct Reconciler {
    cluster: Cluster,
    selector: TargetSelector,
    output: Output,
    call_timeout: Duration,
}

impl Reconciler {
    #[must_use]
    pub const fn new(
        cluster: Cluster,
        selector: TargetSelector,
        output: Output,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            selector,
            output,
            call_timeout,
        }
    }

    /// One pass. Cluster errors are logged with their classification and
    /// returned.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<RoutingMaps> {
        let ctx = CallContext::with_cancellation(self.call_timeout, cancel.child_token());
        match self.selector.reconcile(&mut self.cluster, &ctx).await {
            Ok(maps) => {
                self.output.publish(&maps).await?;
                Ok(maps)
            }
            Err(e) => {
                error!(
                    routing_config = %self.selector.routing_config(),
                    error = %e,
                    class = ?e.class(),
                    retryable = e.is_retryable(),
                    "Reconciliation pass failed"
                );
                Err(e.into())
            }
        }
    }

    /// Run a pass every `interval` until `cancel` fires
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Reconciliation loop started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(&cancel).await {
                        if cancel.is_cancelled() {
                            break;
                        }
                        warn!(error = %e, "Retrying on next tick");
                    }
                }
            }
        }
        info!("Reconciliation loop stopped");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardroute_cluster::{RoutingMap, RoutingTarget};

    #[tokio::test]
    async fn test_publish_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routing.json");
        let output = Output::from_path(path.to_str());

        let mut replicas = RoutingMap::new();
        replicas.insert(
            "shard01".to_string(),
            RoutingTarget {
                address: "10.0.1.2:6379".to_string(),
                alias: None,
            },
        );
        let maps = RoutingMaps {
            masters: None,
            replicas: Some(replicas),
        };
        output.publish(&maps).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["replicas"]["shard01"]["address"], "10.0.1.2:6379");
        assert!(!dir.path().join("routing.json.tmp").exists());
    }

    #[test]
    fn test_output_defaults_to_stdout() {
        assert!(matches!(Output::from_path(None), Output::Stdout));
    }
}
