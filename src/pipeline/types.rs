//! Core data structures: observed events, valued positions, snapshot records

use alloy::primitives::{Address, U256};
use serde::Serialize;

/// One position-open (`Build`) action observed on a market contract
///
/// Identity: (market, owner, position_id, block_number).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
    /// Market identifier from configuration (e.g. "WETH/USDC")
    pub market: String,
    pub owner: Address,
    pub position_id: U256,
    /// Open interest of the new position, raw OI units
    pub user_oi: U256,
    pub block_number: u64,
}

/// ERC-20 `Transfer` of the collateral token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    /// Raw base units
    pub amount: U256,
    pub block_number: u64,
}

/// A Build event paired with its current cost and value (raw base units)
///
/// `value` is `None` when the value read failed; such events still count
/// toward exposure but not toward P&L.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuedEvent {
    pub event: BuildEvent,
    pub cost: U256,
    pub value: Option<U256>,
}

/// Fixed-point decimal scale of an on-chain quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenScale {
    decimals: u32,
}

impl TokenScale {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Convert raw base units to token units (floating division, no rounding)
    pub fn to_tokens(&self, raw: U256) -> f64 {
        raw_to_f64(raw) / 10f64.powi(self.decimals as i32)
    }
}

/// Nearest `f64` of a raw 256-bit amount
pub fn raw_to_f64(raw: U256) -> f64 {
    raw.as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

/// Number of collateral buckets in an exposure snapshot
pub const EXPOSURE_BUCKET_COUNT: usize = 5;

/// Collateral distribution of all known positions in a market
///
/// `counts[i]` covers `(EXPOSURE_BOUNDS[i], EXPOSURE_BOUNDS[i + 1]]` whole
/// tokens; see `aggregator::EXPOSURE_BOUNDS`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureSnapshot {
    pub market: String,
    pub timestamp: i64,
    pub counts: [u32; EXPOSURE_BUCKET_COUNT],
}

impl ExposureSnapshot {
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnLSnapshot {
    pub market: String,
    pub timestamp: i64,
    pub total_unrealized_profit: f64,
    pub total_unrealized_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSnapshot {
    pub market: String,
    pub timestamp: i64,
    pub total_minted: f64,
    pub total_burnt: f64,
}

/// Single-event record emitted by the build watcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSnapshot {
    pub market: String,
    pub timestamp: i64,
    pub sender: String,
    pub cap_oi: f64,
    pub user_oi: f64,
    pub collateral: f64,
    pub percentage_of_cap_oi_bought: f64,
}

/// Anything the snapshot store accepts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SnapshotRecord {
    Exposure(ExposureSnapshot),
    PnL(PnLSnapshot),
    Transfer(TransferSnapshot),
    Build(BuildSnapshot),
}

impl SnapshotRecord {
    /// Collection (table / JSONL file) the record is appended to
    pub fn collection(&self) -> &'static str {
        match self {
            SnapshotRecord::Exposure(_) => "exposure_snapshots",
            SnapshotRecord::PnL(_) => "pnl_snapshots",
            SnapshotRecord::Transfer(_) => "transfer_snapshots",
            SnapshotRecord::Build(_) => "build_snapshots",
        }
    }

    pub fn market(&self) -> &str {
        match self {
            SnapshotRecord::Exposure(s) => &s.market,
            SnapshotRecord::PnL(s) => &s.market,
            SnapshotRecord::Transfer(s) => &s.market,
            SnapshotRecord::Build(s) => &s.market,
        }
    }
}

impl BuildEvent {
    /// Lowercase `0x` form of the owner address
    pub fn owner_hex(&self) -> String {
        format!("0x{}", hex::encode(self.owner))
    }
}
