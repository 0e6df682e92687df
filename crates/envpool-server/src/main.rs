//! envpool-server: HTTP front end for the environment leasing pool.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use envpool::{
    EventLog, ExpiryReclaimer, FlatFileStore, LeaseRegistry, PoolConfig, PoolService, VersionInfo,
};

/// Initialize tracing with ENVPOOL_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("ENVPOOL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "envpool={level},envpool_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = PoolConfig::from_env();

    let store = FlatFileStore::open(&config.data_dir)
        .await
        .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;
    info!(
        data_dir = %store.dir().display(),
        lease_ttl = ?config.lease_ttl,
        reclaim_interval = ?config.reclaim_interval,
        event_log = ?config.event_log,
        "Starting envpool"
    );

    let events = match &config.event_log {
        Some(path) => EventLog::new(path),
        None => EventLog::disabled(),
    };

    let registry = Arc::new(
        LeaseRegistry::new(Arc::new(store), config.lease_ttl).with_event_log(events),
    );

    let mut version = VersionInfo::new();
    if let Ok(build) = std::env::var("ENVPOOL_BUILD") {
        version = version.with_build(build);
    }
    let service = Arc::new(PoolService::new(registry.clone()).with_version(version));

    let reclaimer = ExpiryReclaimer::new(registry, service.clock().clone())
        .with_interval(config.reclaim_interval)
        .with_retry(config.reclaim_retry)
        .spawn();

    let result = envpool::transport::serve(config.server(), service).await;

    reclaimer.shutdown().await;
    result
}
