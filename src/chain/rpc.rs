//! Ethereum JSON-RPC implementation of [`ChainReader`]
//!
//! Uses an `alloy` HTTP provider for `eth_blockNumber`, `eth_getLogs` and
//! `eth_call`. Batched reads go through a Multicall3 deployment
//! (`aggregate3` with `allowFailure = true`) so a whole valuation batch is one
//! HTTP request and a single reverting element does not sink the batch.

use super::{ChainError, ChainReader, ContractCall, Log, LogFilter, RawValue};
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use async_trait::async_trait;
use std::time::Duration;

sol! {
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
    }
}

pub use IMulticall3::{aggregate3Call, Call3, Call3Result};

pub struct JsonRpcChainReader {
    provider: RootProvider,
    multicall: Address,
}

impl JsonRpcChainReader {
    /// Create a reader for `url`
    ///
    /// Arguments:
    /// - `url`: HTTP(S) JSON-RPC endpoint
    /// - `multicall`: Multicall3 contract used by `batch_call`
    /// - `timeout`: per-request HTTP timeout
    pub fn new(url: &str, multicall: Address, timeout: Duration) -> Result<Self, ChainError> {
        let endpoint: reqwest::Url = url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid RPC URL: {}", e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let transport = Http::with_client(client, endpoint);

        Ok(Self {
            provider: RootProvider::new(RpcClient::new(transport, false)),
            multicall,
        })
    }

    async fn eth_call(&self, target: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default().to(target).input(data.into());
        Ok(self.provider.call(request).await?)
    }
}

/// `eth_getLogs` filter for `filter`
pub fn to_rpc_filter(filter: &LogFilter) -> Filter {
    let mut rpc_filter = Filter::new()
        .address(filter.address)
        .from_block(filter.from_block)
        .to_block(filter.to_block);

    for (position, topic) in filter.topics.iter().take(4).enumerate() {
        if let Some(topic) = topic {
            rpc_filter.topics[position] = (*topic).into();
        }
    }
    rpc_filter
}

/// `aggregate3` calldata with every element allowed to fail
pub fn encode_batch(calls: &[ContractCall]) -> Bytes {
    aggregate3Call {
        calls: calls
            .iter()
            .map(|call| Call3 {
                target: call.target,
                allowFailure: true,
                callData: call.data.clone(),
            })
            .collect(),
    }
    .abi_encode()
    .into()
}

/// Per-call results of an `aggregate3` return payload
pub fn decode_batch(returned: &[u8]) -> Result<Vec<RawValue>, ChainError> {
    let results = aggregate3Call::abi_decode_returns(returned)?;
    Ok(results
        .into_iter()
        .map(|result| result.success.then_some(result.returnData))
        .collect())
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn current_block(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        Ok(self.provider.get_logs(&to_rpc_filter(filter)).await?)
    }

    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<RawValue>, ChainError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let returned = self.eth_call(self.multicall, encode_batch(calls)).await?;

        log::debug!(
            "📦 Multicall: {} reads, {} bytes returned",
            calls.len(),
            returned.len()
        );

        decode_batch(&returned)
    }

    async fn call(&self, call: &ContractCall) -> Result<Bytes, ChainError> {
        self.eth_call(call.target, call.data.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, U256};
    use alloy::rpc::types::FilterBlockOption;
    use alloy::sol_types::SolValue;

    #[test]
    fn test_rpc_filter_shape() {
        let filter = LogFilter {
            address: Address::repeat_byte(0x11),
            topics: vec![Some(B256::repeat_byte(0xaa)), None, Some(B256::repeat_byte(0xbb))],
            from_block: 0,
            to_block: 255,
        };

        let rpc_filter = to_rpc_filter(&filter);
        match rpc_filter.block_option {
            FilterBlockOption::Range { from_block, to_block } => {
                assert_eq!(from_block, Some(0u64.into()));
                assert_eq!(to_block, Some(255u64.into()));
            }
            other => panic!("expected a block range, got {:?}", other),
        }
        assert!(rpc_filter.topics[0].matches(&B256::repeat_byte(0xaa)));
        assert!(rpc_filter.topics[1].is_empty());
        assert!(rpc_filter.topics[2].matches(&B256::repeat_byte(0xbb)));

        let json = serde_json::to_value(&rpc_filter).unwrap();
        assert_eq!(json["fromBlock"], "0x0");
        assert_eq!(json["toBlock"], "0xff");
    }

    #[test]
    fn test_batch_encoding_allows_failure() {
        let calls = vec![
            ContractCall {
                target: Address::repeat_byte(0x05),
                data: Bytes::from_static(&[1, 2, 3, 4]),
            },
            ContractCall {
                target: Address::repeat_byte(0x06),
                data: Bytes::new(),
            },
        ];

        let encoded = encode_batch(&calls);
        assert_eq!(&encoded[..4], &aggregate3Call::SELECTOR);
        let decoded = aggregate3Call::abi_decode(&encoded).unwrap();
        assert_eq!(decoded.calls.len(), 2);
        assert!(decoded.calls.iter().all(|call| call.allowFailure));
        assert_eq!(decoded.calls[1].target, Address::repeat_byte(0x06));
    }

    #[test]
    fn test_batch_decoding_maps_failures_to_none() {
        let results = vec![
            Call3Result {
                success: true,
                returnData: U256::from(42).abi_encode().into(),
            },
            Call3Result {
                success: false,
                returnData: Bytes::from_static(b"reverted"),
            },
        ];
        let payload = (results,).abi_encode_params();

        let decoded = decode_batch(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_deref().map(|b| &b[..]), Some(U256::from(42).abi_encode().as_slice()));
        assert_eq!(decoded[1], None);

        assert!(decode_batch(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = JsonRpcChainReader::new("not a url", Address::ZERO, Duration::from_secs(1));
        assert!(matches!(result, Err(ChainError::Transport(_))));
    }
}
