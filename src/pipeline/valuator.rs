//! Position valuation: current cost and value of every known position

use super::config::MarketConfig;
use super::error::{bounded, PipelineError};
use super::types::{BuildEvent, ValuedEvent};
use crate::chain::overlay::{cost_call, decode_uint_return, value_call};
use crate::chain::{ChainReader, RawValue};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

pub struct PositionValuator {
    reader: Arc<dyn ChainReader>,
    state_contract: Address,
    rpc_timeout: Duration,
}

impl PositionValuator {
    pub fn new(reader: Arc<dyn ChainReader>, state_contract: Address, rpc_timeout: Duration) -> Self {
        Self {
            reader,
            state_contract,
            rpc_timeout,
        }
    }

    /// Read `cost` and `value` for every event in one batched round trip
    ///
    /// Per-position outcomes:
    /// - cost unreadable: position dropped (warn)
    /// - value unreadable: position kept with `value = None`
    ///
    /// The whole batch failing, or answering with the wrong number of
    /// results, is a `Valuation` error. Output preserves input order.
    pub async fn value_positions(
        &self,
        market: &MarketConfig,
        events: &[BuildEvent],
    ) -> Result<Vec<ValuedEvent>, PipelineError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        // Interleaved: [cost_0, value_0, cost_1, value_1, ...]
        let calls: Vec<_> = events
            .iter()
            .flat_map(|event| {
                [
                    cost_call(self.state_contract, market.address, event.owner, event.position_id),
                    value_call(self.state_contract, market.address, event.owner, event.position_id),
                ]
            })
            .collect();

        let results = bounded(self.rpc_timeout, "multicall valuation", self.reader.batch_call(&calls))
            .await
            .map_err(|e| PipelineError::Valuation(format!("{}: {}", market.name, e)))?;

        if results.len() != calls.len() {
            return Err(PipelineError::Valuation(format!(
                "{}: expected {} results, got {}",
                market.name,
                calls.len(),
                results.len()
            )));
        }

        let mut valued = Vec::with_capacity(events.len());
        let mut dropped = 0usize;
        for (event, pair) in events.iter().zip(results.chunks_exact(2)) {
            let cost = match decode_result(&pair[0]) {
                Some(cost) => cost,
                None => {
                    log::warn!(
                        "⚠️  Dropping position {} of {} ({}): cost unreadable",
                        event.position_id,
                        event.owner_hex(),
                        market.name
                    );
                    dropped += 1;
                    continue;
                }
            };

            let value = decode_result(&pair[1]);
            if value.is_none() {
                log::debug!(
                    "Position {} of {} ({}): value unreadable, excluded from P&L",
                    event.position_id,
                    event.owner_hex(),
                    market.name
                );
            }

            valued.push(ValuedEvent {
                event: event.clone(),
                cost,
                value,
            });
        }

        if dropped > 0 {
            log::info!("   ├─ {} valued, {} dropped ({})", valued.len(), dropped, market.name);
        }

        Ok(valued)
    }
}

fn decode_result(result: &RawValue) -> Option<U256> {
    result.as_deref().and_then(|data| decode_uint_return(data).ok())
}
