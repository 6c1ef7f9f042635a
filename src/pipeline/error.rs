//! Pipeline error taxonomy
//!
//! None of these terminate the scheduler or the build watcher: a failed
//! cycle is logged and retried on the next tick, a failed build event is
//! logged and skipped.

use super::db::StoreError;
use crate::chain::ChainError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug)]
pub enum PipelineError {
    /// RPC / network failure; the range is retried next cycle
    Transport(String),
    /// Batch valuation failed as a whole or returned the wrong shape
    Valuation(String),
    /// Snapshot store write failed; the cursor is not advanced
    Persistence(String),
    /// Chain data could not be decoded
    Decode(String),
    /// An RPC request or a whole cycle exceeded its time budget
    Timeout(String),
    /// Event refers to something the configuration does not know
    Config(String),
}

impl From<ChainError> for PipelineError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transport(msg) => PipelineError::Transport(msg),
            ChainError::Rpc { code, message } => {
                PipelineError::Transport(format!("RPC error {}: {}", code, message))
            }
            ChainError::Decode(msg) => PipelineError::Decode(msg),
            ChainError::Timeout(msg) => PipelineError::Timeout(msg),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Transport(msg) => write!(f, "Transport error: {}", msg),
            PipelineError::Valuation(msg) => write!(f, "Valuation error: {}", msg),
            PipelineError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            PipelineError::Decode(msg) => write!(f, "Decode error: {}", msg),
            PipelineError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Await a chain request with an upper bound on its duration
pub async fn bounded<T, F>(limit: Duration, what: &str, request: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Timeout(format!(
            "{} exceeded {}ms",
            what,
            limit.as_millis()
        ))),
    }
}
