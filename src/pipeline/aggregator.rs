//! Snapshot aggregation
//!
//! Pure functions over valued events and transfer events. No I/O, no clock:
//! the caller supplies the timestamp, so identical input always yields
//! identical snapshots.

use super::error::PipelineError;
use super::types::{
    raw_to_f64, BuildEvent, BuildSnapshot, ExposureSnapshot, PnLSnapshot, TokenScale,
    TransferEvent, TransferSnapshot, ValuedEvent, EXPOSURE_BUCKET_COUNT,
};
use alloy::primitives::U256;

/// Bucket edges in whole tokens; bucket `i` is `(EXPOSURE_BOUNDS[i], EXPOSURE_BOUNDS[i + 1]]`
pub const EXPOSURE_BOUNDS: [f64; EXPOSURE_BUCKET_COUNT + 1] = [0.0, 10.0, 20.0, 100.0, 500.0, 1000.0];

/// Bucket index for a collateral amount in whole tokens
///
/// `None` for anything outside `(0, 1000]` (including NaN): those positions
/// are excluded from the snapshot, not counted anywhere.
pub fn exposure_bucket(collateral: f64) -> Option<usize> {
    EXPOSURE_BOUNDS
        .windows(2)
        .position(|edge| collateral > edge[0] && collateral <= edge[1])
}

/// Count positions per collateral bucket
pub fn bucket_exposure(
    market: &str,
    timestamp: i64,
    valued: &[ValuedEvent],
    scale: TokenScale,
) -> ExposureSnapshot {
    let mut counts = [0u32; EXPOSURE_BUCKET_COUNT];

    for position in valued {
        if let Some(bucket) = exposure_bucket(scale.to_tokens(position.cost)) {
            counts[bucket] += 1;
        }
    }

    ExposureSnapshot {
        market: market.to_string(),
        timestamp,
        counts,
    }
}

/// Sum unrealized profit and loss over positions with a resolved value
///
/// Sums are accumulated on raw integers and scaled once, so the result does
/// not depend on input order.
pub fn compute_pnl(
    market: &str,
    timestamp: i64,
    valued: &[ValuedEvent],
    scale: TokenScale,
) -> PnLSnapshot {
    let (profit, loss) = valued
        .iter()
        .filter_map(|position| position.value.map(|value| (value, position.cost)))
        .fold((U256::ZERO, U256::ZERO), |(profit, loss), (value, cost)| {
            if value > cost {
                (profit.saturating_add(value - cost), loss)
            } else {
                // value == cost adds zero
                (profit, loss.saturating_add(cost - value))
            }
        });

    PnLSnapshot {
        market: market.to_string(),
        timestamp,
        total_unrealized_profit: scale.to_tokens(profit),
        total_unrealized_loss: scale.to_tokens(loss),
    }
}

/// Gross raw mint and burn totals
///
/// The scheduler keeps one per market and folds each cycle's new transfers
/// into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub minted: U256,
    pub burnt: U256,
}

impl TransferTotals {
    /// New totals with `mints` and `burns` added (independently)
    pub fn accumulate(&self, mints: &[TransferEvent], burns: &[TransferEvent]) -> Self {
        Self {
            minted: sum_amounts(self.minted, mints),
            burnt: sum_amounts(self.burnt, burns),
        }
    }

    pub fn to_snapshot(&self, market: &str, timestamp: i64, scale: TokenScale) -> TransferSnapshot {
        TransferSnapshot {
            market: market.to_string(),
            timestamp,
            total_minted: scale.to_tokens(self.minted),
            total_burnt: scale.to_tokens(self.burnt),
        }
    }
}

fn sum_amounts(start: U256, transfers: &[TransferEvent]) -> U256 {
    transfers
        .iter()
        .fold(start, |total, transfer| total.saturating_add(transfer.amount))
}

/// Gross mint and burn totals of two independent transfer sequences
pub fn compute_transfers(
    market: &str,
    timestamp: i64,
    mints: &[TransferEvent],
    burns: &[TransferEvent],
    scale: TokenScale,
) -> TransferSnapshot {
    TransferTotals::default()
        .accumulate(mints, burns)
        .to_snapshot(market, timestamp, scale)
}

/// Share of market capacity taken by a freshly built position
///
/// `user_oi` and `cap_oi` share the market's OI scale, so the percentage is
/// taken on raw integers and only the reported amounts are scaled.
pub fn build_snapshot(
    event: &BuildEvent,
    timestamp: i64,
    cap_oi: U256,
    collateral: U256,
    oi_scale: TokenScale,
    collateral_scale: TokenScale,
) -> Result<BuildSnapshot, PipelineError> {
    if cap_oi.is_zero() {
        return Err(PipelineError::Valuation(format!(
            "market {} reports zero capacity OI",
            event.market
        )));
    }

    Ok(BuildSnapshot {
        market: event.market.clone(),
        timestamp,
        sender: event.owner_hex(),
        cap_oi: oi_scale.to_tokens(cap_oi),
        user_oi: oi_scale.to_tokens(event.user_oi),
        collateral: collateral_scale.to_tokens(collateral),
        percentage_of_cap_oi_bought: raw_to_f64(event.user_oi) * 100.0 / raw_to_f64(cap_oi),
    })
}
