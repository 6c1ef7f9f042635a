//! Poll scheduler: periodic per-market scan, valuation, aggregation, persistence
//!
//! Each market has a [`MarketCursor`] owned by the scheduler loop. A cycle
//! only mutates the cursor after every snapshot has been written, so a
//! failed or timed-out cycle is retried from the same floor on the next tick.
//!
//! Logs are read in windows of at most `max_block_range` blocks. A cycle
//! stops opening new windows once half of its time budget is spent and
//! commits what it scanned, so a market far behind the head catches up over
//! several ticks instead of timing out forever.

use super::aggregator::{bucket_exposure, compute_pnl, TransferTotals};
use super::config::{CoreContracts, MarketConfig, DEFAULT_MAX_BLOCK_RANGE};
use super::db::SnapshotStore;
use super::error::{bounded, PipelineError};
use super::types::{
    BuildEvent, ExposureSnapshot, PnLSnapshot, SnapshotRecord, TransferEvent, TransferSnapshot,
};
use super::valuator::PositionValuator;
use crate::chain::overlay::{fetch_build_events, fetch_transfers};
use crate::chain::ChainReader;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scanning,
    Valuating,
    Aggregating,
    Persisting,
}

/// Per-market progress
///
/// `floor_block` is the first block not yet scanned. `positions` and
/// `transfers` cover everything in `[initial floor, floor_block)`.
#[derive(Debug)]
pub struct MarketCursor {
    market: String,
    floor_block: u64,
    positions: Vec<BuildEvent>,
    transfers: TransferTotals,
    state: CycleState,
}

impl MarketCursor {
    pub fn new(market: &str, floor_block: u64) -> Self {
        Self {
            market: market.to_string(),
            floor_block,
            positions: Vec::new(),
            transfers: TransferTotals::default(),
            state: CycleState::Idle,
        }
    }

    pub fn floor_block(&self) -> u64 {
        self.floor_block
    }

    pub fn positions(&self) -> &[BuildEvent] {
        &self.positions
    }

    pub fn transfers(&self) -> TransferTotals {
        self.transfers
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        log::debug!("{}: {:?} → {:?}", self.market, self.state, next);
        self.state = next;
    }
}

/// Logs gathered from `[floor, scanned_to]`
#[derive(Debug, Default)]
struct ScanResult {
    builds: Vec<BuildEvent>,
    mints: Vec<TransferEvent>,
    burns: Vec<TransferEvent>,
    scanned_to: Option<u64>,
    windows: usize,
}

/// What a successful cycle produced
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Last block scanned, `None` when no new block had been produced
    pub scanned_to: Option<u64>,
    /// Chain head seen at the start of the cycle
    pub head: u64,
    pub new_positions: usize,
    pub valued_positions: usize,
    pub exposure: ExposureSnapshot,
    pub pnl: PnLSnapshot,
    pub transfers: TransferSnapshot,
}

pub struct PollScheduler {
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn SnapshotStore>,
    contracts: CoreContracts,
    valuator: PositionValuator,
    rpc_timeout: Duration,
    cycle_timeout: Duration,
    max_block_range: u64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PollScheduler {
    /// Arguments:
    /// - `reader`: Chain access shared with the build watcher
    /// - `store`: Snapshot destination
    /// - `contracts`: State, token and multicall addresses
    /// - `rpc_timeout`: Upper bound for every single RPC
    /// - `cycle_timeout`: Upper bound for one whole market cycle
    pub fn new(
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn SnapshotStore>,
        contracts: CoreContracts,
        rpc_timeout: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        let valuator = PositionValuator::new(reader.clone(), contracts.state, rpc_timeout);
        Self {
            reader,
            store,
            contracts,
            valuator,
            rpc_timeout,
            cycle_timeout,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Largest block span per `eth_getLogs` (at least 1)
    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    /// Replace the snapshot clock (tests)
    pub fn with_timestamp_fn(mut self, now_fn: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// One full cycle for one market, bounded by the cycle timeout
    ///
    /// On error the cursor is exactly as it was before the call (apart from
    /// its state, which is back to `Idle`).
    pub async fn run_market_cycle(
        &self,
        market: &MarketConfig,
        cursor: &mut MarketCursor,
    ) -> Result<CycleOutcome, PipelineError> {
        let result = match tokio::time::timeout(self.cycle_timeout, self.cycle(market, cursor)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(format!(
                "{} cycle exceeded {}ms",
                market.name,
                self.cycle_timeout.as_millis()
            ))),
        };

        if result.is_err() {
            cursor.transition(CycleState::Idle);
        }
        result
    }

    /// Read Build, mint and burn logs in windows from `floor` towards `head`
    ///
    /// Any window failing fails the scan. New windows stop being opened
    /// once `deadline` has passed; the result then ends short of `head`.
    async fn scan(
        &self,
        market: &MarketConfig,
        floor: u64,
        head: u64,
        deadline: Instant,
    ) -> Result<ScanResult, PipelineError> {
        let reader = self.reader.as_ref();
        let mut scan = ScanResult::default();
        let mut from = floor;

        while from <= head {
            let to = head.min(from.saturating_add(self.max_block_range - 1));

            let builds = bounded(
                self.rpc_timeout,
                "Build logs",
                fetch_build_events(reader, market, from, to),
            )
            .await?;
            let (mints, burns) = bounded(
                self.rpc_timeout,
                "Transfer logs",
                fetch_transfers(reader, self.contracts.token, market.address, from, to),
            )
            .await?;

            scan.builds.extend(builds);
            scan.mints.extend(mints);
            scan.burns.extend(burns);
            scan.scanned_to = Some(to);
            scan.windows += 1;

            if to == head {
                break;
            }
            from = to + 1;

            if Instant::now() >= deadline {
                log::info!(
                    "⏳ {}: scan budget spent at block {} ({} blocks behind head {})",
                    market.name,
                    to,
                    head - to,
                    head
                );
                break;
            }
        }

        Ok(scan)
    }

    async fn cycle(
        &self,
        market: &MarketConfig,
        cursor: &mut MarketCursor,
    ) -> Result<CycleOutcome, PipelineError> {
        let started = Instant::now();
        cursor.transition(CycleState::Scanning);
        let floor = cursor.floor_block;
        let head = bounded(self.rpc_timeout, "eth_blockNumber", self.reader.current_block()).await?;

        let scan = if head >= floor {
            self.scan(market, floor, head, started + self.cycle_timeout / 2)
                .await?
        } else {
            log::debug!("{}: no new block since {}", market.name, floor - 1);
            ScanResult::default()
        };
        if scan.windows > 1 {
            log::debug!("{}: scanned {} log windows", market.name, scan.windows);
        }

        cursor.transition(CycleState::Valuating);
        let known: Vec<BuildEvent> = cursor
            .positions
            .iter()
            .chain(scan.builds.iter())
            .cloned()
            .collect();
        let valued = self.valuator.value_positions(market, &known).await?;

        cursor.transition(CycleState::Aggregating);
        let timestamp = (self.now_fn)();
        let collateral = market.collateral_scale();
        let totals = cursor.transfers.accumulate(&scan.mints, &scan.burns);
        let exposure = bucket_exposure(&market.name, timestamp, &valued, collateral);
        let pnl = compute_pnl(&market.name, timestamp, &valued, collateral);
        let transfers = totals.to_snapshot(&market.name, timestamp, collateral);

        cursor.transition(CycleState::Persisting);
        for record in [
            SnapshotRecord::Exposure(exposure.clone()),
            SnapshotRecord::PnL(pnl.clone()),
            SnapshotRecord::Transfer(transfers.clone()),
        ] {
            self.store.create(record).await?;
        }

        // Commit: nothing below may await
        let new_count = scan.builds.len();
        cursor.positions.extend(scan.builds);
        cursor.transfers = totals;
        if let Some(block) = scan.scanned_to {
            cursor.floor_block = block + 1;
        }
        cursor.transition(CycleState::Idle);

        Ok(CycleOutcome {
            scanned_to: scan.scanned_to,
            head,
            new_positions: new_count,
            valued_positions: valued.len(),
            exposure,
            pnl,
            transfers,
        })
    }

    /// Run one cycle for every market, sequentially
    ///
    /// Returns `(succeeded, failed)`. A failing market never stops the others.
    pub async fn run_tick(
        &self,
        markets: &[MarketConfig],
        cursors: &mut HashMap<String, MarketCursor>,
    ) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;

        for market in markets {
            let cursor = match cursors.get_mut(&market.name) {
                Some(cursor) => cursor,
                None => {
                    log::error!("❌ No cursor for market {}", market.name);
                    failed += 1;
                    continue;
                }
            };

            match self.run_market_cycle(market, cursor).await {
                Ok(outcome) => {
                    succeeded += 1;
                    log_outcome(&market.name, &outcome);
                }
                Err(e) => {
                    failed += 1;
                    log::error!(
                        "❌ {} cycle failed (floor stays at {}): {}",
                        market.name,
                        cursor.floor_block(),
                        e
                    );
                }
            }
        }

        (succeeded, failed)
    }
}

fn log_outcome(market: &str, outcome: &CycleOutcome) {
    let c = &outcome.exposure.counts;
    log::info!(
        "📊 {} | blocks ≤ {} (head {}) | +{} positions, {} valued",
        market,
        outcome
            .scanned_to
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string()),
        outcome.head,
        outcome.new_positions,
        outcome.valued_positions
    );
    log::info!(
        "   ├─ Exposure: 0-10: {} | 10-20: {} | 20-100: {} | 100-500: {} | 500-1000: {}",
        c[0], c[1], c[2], c[3], c[4]
    );
    log::info!(
        "   ├─ Unrealized P&L: +{:.4} / -{:.4}",
        outcome.pnl.total_unrealized_profit,
        outcome.pnl.total_unrealized_loss
    );
    log::info!(
        "   └─ Minted: {:.4} | Burnt: {:.4}",
        outcome.transfers.total_minted,
        outcome.transfers.total_burnt
    );
}

/// Poll scheduler task - scan every market once per interval
///
/// Arguments:
/// - `scheduler`: Configured scheduler
/// - `markets`: Markets to poll, in processing order
/// - `floor_block`: Initial floor for every market cursor
/// - `poll_interval_ms`: Tick interval in milliseconds
///
/// A tick that overruns the interval delays the next one; cycles for the
/// same market never overlap. Runs until cancelled.
pub async fn poll_scheduler_task(
    scheduler: PollScheduler,
    markets: Vec<MarketConfig>,
    floor_block: u64,
    poll_interval_ms: u64,
) {
    log::info!(
        "⏰ Starting poll scheduler ({} markets, interval: {}ms, floor: {})",
        markets.len(),
        poll_interval_ms,
        floor_block
    );

    let mut cursors: HashMap<String, MarketCursor> = markets
        .iter()
        .map(|market| (market.name.clone(), MarketCursor::new(&market.name, floor_block)))
        .collect();

    let mut timer = interval(Duration::from_millis(poll_interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let (succeeded, failed) = scheduler.run_tick(&markets, &mut cursors).await;
        if failed > 0 {
            log::warn!("⚠️  Tick finished: {} ok, {} failed", succeeded, failed);
        } else {
            log::debug!("Tick finished: {} ok", succeeded);
        }
    }
}
