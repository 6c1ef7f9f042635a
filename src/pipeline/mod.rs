//! # Analytics Pipeline
//!
//! Turns raw market activity into time-stamped snapshots:
//!
//! 1. The poll scheduler scans each market from its floor block to the chain
//!    head, values every known position through one multicall, aggregates
//!    exposure buckets, unrealized P&L and mint/burn totals, and appends the
//!    three snapshots to the store.
//! 2. The build watcher follows new Build events as they land and records
//!    how much of the market's capacity each one took.
//!
//! A cycle either persists all of its snapshots and advances the market's
//! floor, or leaves the floor where it was and is retried on the next tick.
//!
//! ## Schema Reference
//!
//! SQLite tables in `/sql/` (JSONL files carry the same names):
//! - `exposure_snapshots` → `ExposureSnapshot`
//! - `pnl_snapshots` → `PnLSnapshot`
//! - `transfer_snapshots` → `TransferSnapshot`
//! - `build_snapshots` → `BuildSnapshot`
//!
//! ## Module Organization
//!
//! - `types` - Events, valued positions, snapshot records
//! - `config` - Environment configuration and market deployment file
//! - `error` - Pipeline error taxonomy and RPC time bounds
//! - `aggregator` - Pure snapshot computations
//! - `valuator` - Batched cost/value reads
//! - `db` - Snapshot store trait and SQLite backend
//! - `jsonl_store` - JSONL backend
//! - `scheduler` - Per-market cursors and the poll loop
//! - `build_watcher` - Live Build subscription and consumer

pub mod aggregator;
pub mod build_watcher;
pub mod config;
pub mod db;
pub mod error;
pub mod jsonl_store;
pub mod scheduler;
pub mod types;
pub mod valuator;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use build_watcher::{spawn_build_subscription, BuildSubscription, BuildWatcher};
pub use config::{BackendType, Deployment, MarketConfig, PipelineConfig};
pub use db::{SnapshotStore, SqliteSnapshotStore, StoreError};
pub use error::PipelineError;
pub use jsonl_store::JsonlSnapshotStore;
pub use scheduler::{poll_scheduler_task, MarketCursor, PollScheduler};
pub use types::{
    BuildEvent, BuildSnapshot, ExposureSnapshot, PnLSnapshot, SnapshotRecord, TransferSnapshot,
};
