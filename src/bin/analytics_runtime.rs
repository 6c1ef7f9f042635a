//! Analytics Runtime
//!
//! Long-running process that:
//! - Loads the market deployment file and opens the snapshot store
//! - Runs the poll scheduler (exposure, P&L, mint/burn snapshots)
//! - Runs the build watcher (one snapshot per live Build event)
//!
//! Usage:
//!   cargo run --release --bin analytics_runtime
//!   cargo run --release --bin analytics_runtime -- --once
//!
//! `--once` runs a single scheduler tick over every market and exits.
//!
//! Environment variables: see `PipelineConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use ovl_analytics::chain::{ChainReader, JsonRpcChainReader};
use ovl_analytics::pipeline::{
    poll_scheduler_task, spawn_build_subscription, BackendType, BuildSubscription, BuildWatcher,
    Deployment, JsonlSnapshotStore, MarketCursor, PipelineConfig, PollScheduler, SnapshotStore,
    SqliteSnapshotStore,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let run_once = std::env::args().any(|arg| arg == "--once");

    info!("🚀 Overlay Analytics Runtime");
    info!("   ├─ Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   └─ Mode: {}", if run_once { "single tick" } else { "continuous" });

    let config = PipelineConfig::from_env()?;
    let deployment = Deployment::load(&config.markets_config_path)?;

    info!("✅ Configuration loaded");
    info!("   ├─ RPC: {}", config.rpc_endpoint_for_log());
    info!("   ├─ Markets file: {}", config.markets_config_path);
    for market in &deployment.markets {
        info!(
            "   ├─ Market {} (collateral 1e{}, OI 1e{})",
            market.name, market.scale.collateral_decimals, market.scale.oi_decimals
        );
    }
    info!("   ├─ Poll interval: {}ms", config.poll_interval_ms);
    info!("   ├─ Build poll interval: {}ms", config.build_poll_interval_ms);
    info!("   ├─ RPC timeout: {}ms", config.rpc_timeout_ms);
    info!("   ├─ Cycle timeout: {}ms", config.cycle_timeout_ms);
    info!("   ├─ Max block range: {}", config.max_block_range);
    info!("   └─ Floor block: {}", config.floor_block);

    let store: Arc<dyn SnapshotStore> = match config.backend {
        BackendType::Sqlite => {
            info!("🔧 Initializing SQLite store...");
            Arc::new(SqliteSnapshotStore::open(&config.db_path, Path::new("sql"))?)
        }
        BackendType::Jsonl => Arc::new(JsonlSnapshotStore::new(&config.jsonl_dir)?),
    };
    info!("✅ Snapshot store: {}", store.backend_type());

    let rpc_timeout = Duration::from_millis(config.rpc_timeout_ms);
    let reader: Arc<dyn ChainReader> = Arc::new(JsonRpcChainReader::new(
        &config.rpc_url,
        deployment.contracts.multicall,
        rpc_timeout,
    )?);

    let scheduler = PollScheduler::new(
        reader.clone(),
        store.clone(),
        deployment.contracts,
        rpc_timeout,
        Duration::from_millis(config.cycle_timeout_ms),
    )
    .with_max_block_range(config.max_block_range);

    if run_once {
        let mut cursors: HashMap<String, MarketCursor> = deployment
            .markets
            .iter()
            .map(|market| (market.name.clone(), MarketCursor::new(&market.name, config.floor_block)))
            .collect();
        let (succeeded, failed) = scheduler.run_tick(&deployment.markets, &mut cursors).await;
        info!("✅ Single tick done: {} ok, {} failed", succeeded, failed);
        return Ok(());
    }

    info!("🚀 Spawning background tasks...");

    if config.build_watcher_enabled {
        let subscription =
            BuildSubscription::new(reader.clone(), deployment.markets.clone(), rpc_timeout)
                .await?
                .with_max_block_range(config.max_block_range);
        let events = spawn_build_subscription(
            subscription,
            Duration::from_millis(config.build_poll_interval_ms),
        );
        let watcher = BuildWatcher::new(
            reader.clone(),
            store.clone(),
            deployment.contracts,
            &deployment.markets,
            rpc_timeout,
        );
        tokio::spawn(watcher.run(events));
        info!("   ├─ ✅ Build watcher spawned");
    } else {
        warn!("   ├─ ⚠️  Build watcher disabled (ENABLE_BUILD_WATCHER=false)");
    }

    let markets = deployment.markets.clone();
    let floor_block = config.floor_block;
    let poll_interval_ms = config.poll_interval_ms;
    tokio::spawn(async move {
        poll_scheduler_task(scheduler, markets, floor_block, poll_interval_ms).await;
    });
    info!("   └─ ✅ Poll scheduler spawned");

    info!("🔄 Press CTRL+C to shutdown");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    info!("✅ Analytics runtime stopped");
    Ok(())
}
