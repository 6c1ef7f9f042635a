//! Real-time Build watcher
//!
//! Producer: [`spawn_build_subscription`] polls new blocks for Build logs on
//! every configured market and pushes them into an unbounded channel.
//! Consumer: [`BuildWatcher::run`] turns each event into a `BuildSnapshot`.
//! Only live events are reported; nothing before the startup block. A
//! subscription that falls behind catches up at most `max_block_range`
//! blocks per poll.

use super::aggregator::build_snapshot;
use super::config::{CoreContracts, MarketConfig, DEFAULT_MAX_BLOCK_RANGE};
use super::db::SnapshotStore;
use super::error::{bounded, PipelineError};
use super::types::{BuildEvent, BuildSnapshot, SnapshotRecord};
use crate::chain::error_handler::ExponentialBackoff;
use crate::chain::overlay::{fetch_build_events, read_cap_oi, read_cost};
use crate::chain::ChainReader;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{interval, MissedTickBehavior};

const BACKOFF_INITIAL_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Block-polling source of Build events across all markets
pub struct BuildSubscription {
    reader: Arc<dyn ChainReader>,
    markets: Vec<MarketConfig>,
    next_block: u64,
    max_block_range: u64,
    rpc_timeout: Duration,
}

impl BuildSubscription {
    /// Subscribe from the block after the current head
    pub async fn new(
        reader: Arc<dyn ChainReader>,
        markets: Vec<MarketConfig>,
        rpc_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let head = bounded(rpc_timeout, "eth_blockNumber", reader.current_block()).await?;
        Ok(Self::starting_at(reader, markets, head + 1, rpc_timeout))
    }

    pub fn starting_at(
        reader: Arc<dyn ChainReader>,
        markets: Vec<MarketConfig>,
        next_block: u64,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            markets,
            next_block,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            rpc_timeout,
        }
    }

    /// Largest block span per `eth_getLogs` (at least 1)
    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Build events in `[next_block, head]` for every market, in block order
    ///
    /// The range is capped at `max_block_range` blocks; the rest is read on
    /// the following polls.
    ///
    /// All markets are read before anything is returned, and `next_block`
    /// only moves on success, so a failed poll is simply repeated.
    pub async fn poll_once(&mut self) -> Result<Vec<BuildEvent>, PipelineError> {
        let reader = self.reader.as_ref();
        let head = bounded(self.rpc_timeout, "eth_blockNumber", reader.current_block()).await?;
        if head < self.next_block {
            return Ok(Vec::new());
        }

        let to = head.min(self.next_block.saturating_add(self.max_block_range - 1));
        let mut events = Vec::new();
        for market in &self.markets {
            let found = bounded(
                self.rpc_timeout,
                "Build logs",
                fetch_build_events(reader, market, self.next_block, to),
            )
            .await?;
            events.extend(found);
        }
        events.sort_by_key(|event| event.block_number);

        if to < head {
            log::debug!("Build subscription catching up: {} of {}", to, head);
        }
        self.next_block = to + 1;
        Ok(events)
    }
}

/// Run `subscription` on its own task and return the event stream
///
/// The stream never ends on RPC errors: the poller backs off (capped) and
/// tries again. It ends only when the receiver is dropped.
pub fn spawn_build_subscription(
    mut subscription: BuildSubscription,
    poll_interval: Duration,
) -> UnboundedReceiver<BuildEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        log::info!(
            "👀 Watching Build events from block {} (interval: {}ms)",
            subscription.next_block(),
            poll_interval.as_millis()
        );

        let mut backoff = ExponentialBackoff::new(BACKOFF_INITIAL_MS, BACKOFF_MAX_MS);
        let mut timer = interval(poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match subscription.poll_once().await {
                Ok(events) => {
                    backoff.reset();
                    for event in events {
                        if tx.send(event).is_err() {
                            log::info!("Build watcher stopped, closing subscription");
                            return;
                        }
                    }
                }
                Err(e) => {
                    log::error!("❌ Build subscription poll failed: {}", e);
                    backoff.sleep().await;
                }
            }
        }
    });

    rx
}

/// Consumer side: one `BuildSnapshot` per Build event
pub struct BuildWatcher {
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn SnapshotStore>,
    contracts: CoreContracts,
    markets: HashMap<String, MarketConfig>,
    rpc_timeout: Duration,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl BuildWatcher {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn SnapshotStore>,
        contracts: CoreContracts,
        markets: &[MarketConfig],
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            store,
            contracts,
            markets: markets
                .iter()
                .map(|market| (market.name.clone(), market.clone()))
                .collect(),
            rpc_timeout,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_timestamp_fn(mut self, now_fn: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// Read capacity and collateral for one event and persist its snapshot
    pub async fn process_build(&self, event: &BuildEvent) -> Result<BuildSnapshot, PipelineError> {
        let market = self
            .markets
            .get(&event.market)
            .ok_or_else(|| PipelineError::Config(format!("unknown market {}", event.market)))?;

        let reader = self.reader.as_ref();
        let state = self.contracts.state;
        let (cap_oi, collateral) = tokio::try_join!(
            bounded(self.rpc_timeout, "capOi", read_cap_oi(reader, state, market.address)),
            bounded(
                self.rpc_timeout,
                "cost",
                read_cost(reader, state, market.address, event.owner, event.position_id)
            ),
        )?;

        let snapshot = build_snapshot(
            event,
            (self.now_fn)(),
            cap_oi,
            collateral,
            market.oi_scale(),
            market.collateral_scale(),
        )?;

        self.store
            .create(SnapshotRecord::Build(snapshot.clone()))
            .await?;
        Ok(snapshot)
    }

    /// Consume `events` until the channel closes
    ///
    /// A failing event is logged and skipped; it never blocks the next one.
    pub async fn run(self, mut events: UnboundedReceiver<BuildEvent>) {
        log::info!("🏗️  Build watcher running ({} markets)", self.markets.len());

        while let Some(event) = events.recv().await {
            match self.process_build(&event).await {
                Ok(snapshot) => log::info!(
                    "🏗️  Build on {} by {}: OI {:.4} of cap {:.4} ({:.4}%), collateral {:.4}",
                    snapshot.market,
                    snapshot.sender,
                    snapshot.user_oi,
                    snapshot.cap_oi,
                    snapshot.percentage_of_cap_oi_bought,
                    snapshot.collateral
                ),
                Err(e) => log::error!(
                    "❌ Skipping Build {} of {} on {} (block {}): {}",
                    event.position_id,
                    event.owner_hex(),
                    event.market,
                    event.block_number,
                    e
                ),
            }
        }

        log::info!("Build event stream closed");
    }
}
