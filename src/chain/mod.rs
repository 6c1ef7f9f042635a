//! Chain access layer
//!
//! Everything that touches the node lives behind [`ChainReader`]: log
//! queries, single reads, and batched reads. Wire types come from `alloy`;
//! the pipeline only ever sees typed [`Log`]s and raw return bytes.

pub mod error_handler;
pub mod overlay;
pub mod rpc;

use alloy::primitives::{Address, Bytes, B256};
use alloy::transports::{RpcError, TransportError, TransportErrorKind};
use async_trait::async_trait;

pub use alloy::rpc::types::Log;
pub use rpc::JsonRpcChainReader;

/// Result of one element of a batched read.
///
/// `None` when that individual call reverted; the batch as a whole still
/// succeeded.
pub type RawValue = Option<Bytes>;

/// A read-only contract call (`eth_call` payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    pub data: Bytes,
}

/// `eth_getLogs` filter over an inclusive block range
///
/// `topics[i] == None` matches any value at that position. At most four
/// positions are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Number of blocks covered (inclusive range)
    pub fn span(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block).saturating_add(1)
    }

    /// Same filter over another block range
    pub fn with_range(&self, from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..self.clone()
        }
    }

    /// Whether `log` would be returned by this filter
    pub fn matches(&self, log: &Log) -> bool {
        let in_range = log
            .block_number
            .is_some_and(|block| block >= self.from_block && block <= self.to_block);

        in_range
            && log.address() == self.address
            && self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
                Some(topic) => log.topics().get(i) == Some(topic),
                None => true,
            })
    }
}

#[derive(Debug)]
pub enum ChainError {
    /// Network / HTTP failure reaching the node
    Transport(String),
    /// The node answered with a JSON-RPC error object
    Rpc { code: i64, message: String },
    /// Response bytes could not be decoded
    Decode(String),
    /// Request exceeded the client timeout
    Timeout(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Timeout(err.to_string())
        } else if err.is_decode() {
            ChainError::Decode(err.to_string())
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

impl From<TransportError> for ChainError {
    fn from(err: TransportError) -> Self {
        if let Some(payload) = err.as_error_resp() {
            return ChainError::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
            };
        }
        match err {
            RpcError::DeserError { .. } | RpcError::SerError(_) | RpcError::NullResp => {
                ChainError::Decode(err.to_string())
            }
            // The HTTP transport boxes the underlying reqwest error
            RpcError::Transport(TransportErrorKind::Custom(ref source))
                if source
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(reqwest::Error::is_timeout) =>
            {
                ChainError::Timeout(err.to_string())
            }
            other => ChainError::Transport(other.to_string()),
        }
    }
}

impl From<alloy::sol_types::Error> for ChainError {
    fn from(err: alloy::sol_types::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ChainError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ChainError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ChainError::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

/// Read-only view of the chain
///
/// Implementations must be safe to share between the poll scheduler and the
/// build watcher.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number
    async fn current_block(&self) -> Result<u64, ChainError>;

    /// Logs matching `filter`, in chain order
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError>;

    /// Execute all `calls` in a single round trip.
    ///
    /// Returns one [`RawValue`] per call, in request order. Fails only when
    /// the batch as a whole could not be executed.
    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<RawValue>, ChainError>;

    /// Execute a single read; a revert is an error
    async fn call(&self, call: &ContractCall) -> Result<Bytes, ChainError>;
}
