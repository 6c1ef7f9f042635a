//! Overlay V1 contract bindings
//!
//! Event topics and function selectors are derived by `sol!` from the
//! declarations below: the market's `Build` event, the collateral token's
//! ERC-20 `Transfer`, and the state contract's position and capacity reads.

use super::{ChainError, ChainReader, ContractCall, Log, LogFilter};
use crate::pipeline::config::MarketConfig;
use crate::pipeline::types::{BuildEvent, TransferEvent};
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    interface IOverlayV1Market {
        event Build(
            address indexed sender,
            uint256 positionId,
            uint256 oi,
            uint256 debt,
            bool isLong,
            uint256 price
        );
    }

    interface IOverlayV1State {
        function cost(address market, address owner, uint256 id) external view returns (uint256);
        function value(address market, address owner, uint256 id) external view returns (uint256);
        function capOi(address market) external view returns (uint256);
    }

    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

pub use IERC20::Transfer;
pub use IOverlayV1Market::Build;
pub use IOverlayV1State::{capOiCall, costCall, valueCall};

/// `state.cost(market, owner, id)`: collateral currently backing a position
pub fn cost_call(state: Address, market: Address, owner: Address, position_id: U256) -> ContractCall {
    ContractCall {
        target: state,
        data: costCall {
            market,
            owner,
            id: position_id,
        }
        .abi_encode()
        .into(),
    }
}

/// `state.value(market, owner, id)`: current mark-to-market of a position
pub fn value_call(state: Address, market: Address, owner: Address, position_id: U256) -> ContractCall {
    ContractCall {
        target: state,
        data: valueCall {
            market,
            owner,
            id: position_id,
        }
        .abi_encode()
        .into(),
    }
}

/// `state.capOi(market)`
pub fn cap_oi_call(state: Address, market: Address) -> ContractCall {
    ContractCall {
        target: state,
        data: capOiCall { market }.abi_encode().into(),
    }
}

/// Decode a `uint256` return value (`cost`, `value` and `capOi` share the shape)
pub fn decode_uint_return(data: &[u8]) -> Result<U256, ChainError> {
    Ok(capOiCall::abi_decode_returns(data)?)
}

fn block_of(log: &Log) -> Result<u64, ChainError> {
    log.block_number
        .ok_or_else(|| ChainError::Decode("log has no block number (pending)".to_string()))
}

/// Decode a market `Build` log
pub fn decode_build_log(market_name: &str, log: &Log) -> Result<BuildEvent, ChainError> {
    let build = Build::decode_log_data(log.data())?;

    Ok(BuildEvent {
        market: market_name.to_string(),
        owner: build.sender,
        position_id: build.positionId,
        user_oi: build.oi,
        block_number: block_of(log)?,
    })
}

/// Decode an ERC-20 `Transfer` log
pub fn decode_transfer_log(log: &Log) -> Result<TransferEvent, ChainError> {
    let transfer = Transfer::decode_log_data(log.data())?;

    Ok(TransferEvent {
        from: transfer.from,
        to: transfer.to,
        amount: transfer.value,
        block_number: block_of(log)?,
    })
}

pub fn build_filter(market: Address, from_block: u64, to_block: u64) -> LogFilter {
    LogFilter {
        address: market,
        topics: vec![Some(Build::SIGNATURE_HASH)],
        from_block,
        to_block,
    }
}

pub fn transfer_filter(token: Address, from: Address, to: Address, from_block: u64, to_block: u64) -> LogFilter {
    LogFilter {
        address: token,
        topics: vec![
            Some(Transfer::SIGNATURE_HASH),
            Some(from.into_word()),
            Some(to.into_word()),
        ],
        from_block,
        to_block,
    }
}

/// All Build events of `market` in `[from_block, to_block]`
///
/// Logs that fail to decode are skipped with a warning.
pub async fn fetch_build_events(
    reader: &dyn ChainReader,
    market: &MarketConfig,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<BuildEvent>, ChainError> {
    let logs = reader
        .get_logs(&build_filter(market.address, from_block, to_block))
        .await?;

    let mut events = Vec::with_capacity(logs.len());
    for entry in &logs {
        match decode_build_log(&market.name, entry) {
            Ok(event) => events.push(event),
            Err(e) => log::warn!(
                "⚠️  Skipping undecodable Build log (market: {}, block: {:?}): {}",
                market.name,
                entry.block_number,
                e
            ),
        }
    }
    Ok(events)
}

/// Mints into and burns from `market` in `[from_block, to_block]`
///
/// Mints are transfers from the zero address to the market; burns are
/// transfers from the market to the zero address. Returns `(mints, burns)`.
pub async fn fetch_transfers(
    reader: &dyn ChainReader,
    token: Address,
    market: Address,
    from_block: u64,
    to_block: u64,
) -> Result<(Vec<TransferEvent>, Vec<TransferEvent>), ChainError> {
    let minted = reader
        .get_logs(&transfer_filter(token, Address::ZERO, market, from_block, to_block))
        .await?;
    let burnt = reader
        .get_logs(&transfer_filter(token, market, Address::ZERO, from_block, to_block))
        .await?;

    let mints = minted.iter().map(decode_transfer_log).collect::<Result<Vec<_>, _>>()?;
    let burns = burnt.iter().map(decode_transfer_log).collect::<Result<Vec<_>, _>>()?;
    Ok((mints, burns))
}

/// Current collateral cost of one position
pub async fn read_cost(
    reader: &dyn ChainReader,
    state: Address,
    market: Address,
    owner: Address,
    position_id: U256,
) -> Result<U256, ChainError> {
    let data = reader.call(&cost_call(state, market, owner, position_id)).await?;
    decode_uint_return(&data)
}

/// Current capacity open interest of a market
pub async fn read_cap_oi(
    reader: &dyn ChainReader,
    state: Address,
    market: Address,
) -> Result<U256, ChainError> {
    let data = reader.call(&cap_oi_call(state, market)).await?;
    decode_uint_return(&data)
}

/// Wrap encoded event data into a log at `block` (test and replay helper)
pub fn log_at(address: Address, data: alloy::primitives::LogData, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(block),
        ..Default::default()
    }
}
