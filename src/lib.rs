//! # ovl-analytics
//!
//! Periodic analytics for Overlay V1 style derivatives markets.
//!
//! ```text
//! ChainReader (JSON-RPC + Multicall3)
//!     ↓
//! PollScheduler ── per market, every POLL_INTERVAL_MS
//!     ├─ Scanning    Build + Transfer logs in [floor_block, head]
//!     ├─ Valuating   PositionValuator (one multicall per cycle)
//!     ├─ Aggregating exposure buckets, unrealized P&L, mint/burn totals
//!     └─ Persisting  SnapshotStore (SQLite or JSONL, append-only)
//!
//! BuildSubscription ── new blocks ──▶ BuildWatcher ──▶ build_snapshots
//! ```

pub mod chain;
pub mod pipeline;
pub mod sqlite_pragma;
