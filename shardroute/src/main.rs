mod reconciler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use shardroute_cluster::{CallContext, Cluster, ConnectionRegistry, RedisConnector, TargetSelector};
use shardroute_core::metrics::{encode_text, PrometheusRecorder};
use shardroute_core::resilience::timeout::TimeoutConfig;
use shardroute_core::{logging, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reconciler::{shutdown_signal, Output, Reconciler};

#[derive(Parser, Debug)]
#[command(name = "shardroute")]
#[command(about = "Sharded Redis topology discovery and routing target selection", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "SHARDROUTE_CONFIG")]
    config: Option<String>,

    /// Run a single reconciliation pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(routing_config = %config.routing.name, "shardroute starting");

    // 3. Metrics
    let metrics = Registry::new();
    let recorder = PrometheusRecorder::register(&metrics)?;

    // 4. Connections and topology
    let timeouts = TimeoutConfig::new()
        .with_call_timeout(config.discovery.call_timeout())
        .with_connect_timeout(Duration::from_secs(config.redis.connect_timeout_secs));
    let connector = RedisConnector::new(config.redis.password.clone(), timeouts);
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(connector)));
    let mut cluster = Cluster::from_topology(&config.topology, registry)?;
    info!(
        shards = cluster.shard_names().len(),
        names = ?cluster.shard_names(),
        monitors = cluster.monitors().len(),
        "Topology loaded"
    );

    let cancel = CancellationToken::new();

    // 5. Optional bootstrap of fresh shards
    if config.bootstrap.enabled {
        let ctx = CallContext::with_cancellation(timeouts.call, cancel.child_token());
        let changed = cluster
            .init(config.bootstrap.master_index, &ctx)
            .await
            .context("Shard bootstrap failed")?;
        info!(changed = ?changed, "Shard bootstrap complete");

        if !cluster.monitors().is_empty() {
            let registered = cluster
                .ensure_monitored(config.bootstrap.quorum, &ctx)
                .await
                .context("Monitor registration failed")?;
            info!(registered = ?registered, "Monitor registration complete");
        }
    }

    // 6. Reconcile
    let selector = TargetSelector::from_config(&config, Arc::new(recorder));
    let mut reconciler = Reconciler::new(
        cluster,
        selector,
        Output::from_path(config.routing.output_path.as_deref()),
        timeouts.call,
    );

    if args.once {
        let result = reconciler.run_once(&cancel).await;
        eprint!("{}", encode_text(&metrics)?);
        result?;
        return Ok(());
    }

    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(reconciler.run(config.discovery.interval(), loop_cancel));

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = handle.await {
        error!("Reconciliation loop panicked: {}", e);
    }

    info!("shardroute stopped");
    Ok(())
}
