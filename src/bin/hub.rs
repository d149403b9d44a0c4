use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use compliance_monitoring::{
    config::{Config, StorageConfig, read_config_file},
    engine::{EngineOptions, MonitorEngine},
    notify::TransportRegistry,
    provider::HttpScanProvider,
    registry::TargetConfig,
    storage::{MemoryStore, StorageBackend},
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("compliance_monitoring", LevelFilter::TRACE),
        ("compliance_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let (store, retention_days, cleanup_interval_hours) = build_store(&config).await?;

    let provider = Arc::new(HttpScanProvider::new(
        config.provider.endpoint.clone(),
        config.provider.token.clone(),
    ));

    let transports = Arc::new(TransportRegistry::from_config(&config.channels));

    let engine = MonitorEngine::start(
        provider,
        store,
        transports,
        EngineOptions {
            scan_timeout: Duration::from_secs(config.provider.timeout_secs),
            tick_interval: Duration::from_secs(config.scheduler.tick_secs),
            max_concurrent_scans: config.scheduler.max_concurrent_scans,
            retention_days,
            cleanup_interval_hours,
        },
    );

    register_targets(&engine, &config).await;

    info!("compliance hub running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("ctrl-c received, shutting down");
    engine.shutdown().await;

    Ok(())
}

/// Build the storage backend from config.
async fn build_store(config: &Config) -> anyhow::Result<(Arc<dyn StorageBackend>, u32, u32)> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            warn!("no persistent storage configured, snapshots are lost on restart");
            Ok((Arc::new(MemoryStore::new()), 90, 24))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
            cleanup_interval_hours,
        } => {
            let store = compliance_monitoring::storage::SqliteStore::new(&path).await?;
            Ok((Arc::new(store), retention_days, cleanup_interval_hours))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            warn!("built without storage-sqlite, falling back to in-memory storage");
            Ok((Arc::new(MemoryStore::new()), 90, 24))
        }
    }
}

/// Register the targets declared in the config file.
async fn register_targets(engine: &MonitorEngine, config: &Config) {
    let Some(targets) = &config.targets else {
        warn!("no targets configured");
        return;
    };

    for spec in targets {
        let result = engine
            .register_target(TargetConfig {
                url: spec.url.clone(),
                owner_id: spec.owner_id.clone(),
                display: spec.display.clone(),
                cadence: spec.cadence,
                compliance_threshold: spec.compliance_threshold,
                notify_enabled: spec.notify_enabled,
                notify_channels: spec.notify_channels.clone(),
            })
            .await;

        match result {
            Ok(id) => debug!("registered {} as {}", spec.url, id),
            Err(e) => warn!("skipping target {}: {}", spec.url, e),
        }
    }
}
