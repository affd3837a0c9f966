//! # Consul Watch
//!
//! Runs a Vigil replica against a Consul agent and logs every service
//! status transition. Start several copies to see only one of them report.
//!
//! Configuration comes from the environment: `CONSUL_HTTP_ADDR`,
//! `CONSUL_HTTP_TOKEN`, `CONSUL_HTTP_SSL`, `CONSUL_DATACENTER`, plus
//! `VIGIL_PREFIX` for the key prefix (default `vigil`) and `RUST_LOG`.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vigil_consul::{ConsulConfig, ConsulRegistry};
use vigil_core::{RemovalPolicy, VigilError};
use vigil_persistence::RegistryStateStore;
use vigil_watch::{forward, LogNotifier, Monitor, MonitorConfig, WatchConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let prefix = std::env::var("VIGIL_PREFIX").unwrap_or_else(|_| "vigil".to_string());
    let consul_config = ConsulConfig::from_env().context("invalid consul configuration")?;
    let registry = Arc::new(
        ConsulRegistry::connect(consul_config)
            .await
            .context("cannot reach consul")?,
    );

    let store = RegistryStateStore::with_key(Arc::clone(&registry), format!("{}/state", prefix))
        .context("invalid VIGIL_PREFIX")?;
    let config = MonitorConfig::default()
        .with_key_prefix(&prefix)
        .with_watch(WatchConfig::default().with_removals(RemovalPolicy::Report));

    let (interrupt_tx, interrupted) = watch::channel(false);
    let interrupt_tx = Arc::new(interrupt_tx);
    let interrupt = {
        let interrupt_tx = Arc::clone(&interrupt_tx);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    interrupt_tx.send_replace(true);
                }
                Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
            }
        })
    };

    info!("Waiting for leadership on {}/.lock", prefix);
    let (monitor, events) =
        match Monitor::start_until(registry, store, config, interrupted.clone()).await {
            Ok(started) => started,
            Err(VigilError::ChannelClosed) => {
                info!("Interrupted before becoming leader");
                return Ok(());
            }
            Err(e) => return Err(e).context("leader election failed"),
        };
    info!("Leader with session {}", monitor.session());

    let monitor = Arc::new(monitor);
    let closer = {
        let monitor = Arc::clone(&monitor);
        let mut interrupted = interrupted.clone();
        tokio::spawn(async move {
            if interrupted.wait_for(|stop| *stop).await.is_ok() {
                monitor.close();
            }
        })
    };

    // Ends once the loop has closed the channel, cleanly or not
    let fed = forward(events, &LogNotifier).await;
    interrupt.abort();
    closer.abort();

    let outcome = monitor.shutdown().await;
    if let Err(e) = &fed {
        error!("Feed ended with error: {}", e);
    }
    outcome.context("watch loop failed")?;
    info!("Stopped");
    Ok(())
}
