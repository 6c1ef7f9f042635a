//! In-memory chain and store doubles for unit tests

use super::db::{SnapshotStore, StoreError};
use super::types::SnapshotRecord;
use crate::chain::overlay::{capOiCall, costCall, log_at, valueCall, Build, Transfer};
use crate::chain::{ChainError, ChainReader, ContractCall, Log, LogFilter, RawValue};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type PositionKey = (Address, Address, U256);

/// Scripted chain: logs, position reads and capacity reads, with failure injection
pub struct MockChainReader {
    block: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    positions: Mutex<HashMap<PositionKey, (Option<U256>, Option<U256>)>>,
    cap_oi: Mutex<HashMap<Address, U256>>,
    failing_block_reads: AtomicU32,
    failing_log_reads: AtomicU32,
    failing_batches: AtomicU32,
    truncate_batches: AtomicBool,
    log_latency: Mutex<Option<Duration>>,
    max_log_span: Mutex<Option<u64>>,
    rejected_from: Mutex<Option<u64>>,
    batch_count: AtomicU32,
    log_count: AtomicU32,
}

impl MockChainReader {
    pub fn new(block: u64) -> Self {
        Self {
            block: Mutex::new(block),
            logs: Mutex::new(Vec::new()),
            positions: Mutex::new(HashMap::new()),
            cap_oi: Mutex::new(HashMap::new()),
            failing_block_reads: AtomicU32::new(0),
            failing_log_reads: AtomicU32::new(0),
            failing_batches: AtomicU32::new(0),
            truncate_batches: AtomicBool::new(false),
            log_latency: Mutex::new(None),
            max_log_span: Mutex::new(None),
            rejected_from: Mutex::new(None),
            batch_count: AtomicU32::new(0),
            log_count: AtomicU32::new(0),
        }
    }

    pub fn set_block(&self, block: u64) {
        *self.block.lock().unwrap() = block;
    }

    pub fn push_build(&self, market: Address, owner: Address, position_id: u64, oi: U256, block: u64) {
        let build = Build {
            sender: owner,
            positionId: U256::from(position_id),
            oi,
            debt: U256::ZERO,
            isLong: true,
            price: U256::ZERO,
        };
        self.logs
            .lock()
            .unwrap()
            .push(log_at(market, build.encode_log_data(), block));
    }

    pub fn push_transfer(&self, token: Address, from: Address, to: Address, amount: U256, block: u64) {
        let transfer = Transfer {
            from,
            to,
            value: amount,
        };
        self.logs
            .lock()
            .unwrap()
            .push(log_at(token, transfer.encode_log_data(), block));
    }

    pub fn set_position(
        &self,
        market: Address,
        owner: Address,
        position_id: u64,
        cost: Option<U256>,
        value: Option<U256>,
    ) {
        self.positions
            .lock()
            .unwrap()
            .insert((market, owner, U256::from(position_id)), (cost, value));
    }

    pub fn set_cap_oi(&self, market: Address, cap_oi: U256) {
        self.cap_oi.lock().unwrap().insert(market, cap_oi);
    }

    pub fn fail_block_reads(&self, times: u32) {
        self.failing_block_reads.store(times, Ordering::SeqCst);
    }

    pub fn fail_log_reads(&self, times: u32) {
        self.failing_log_reads.store(times, Ordering::SeqCst);
    }

    pub fn fail_batch_calls(&self, times: u32) {
        self.failing_batches.store(times, Ordering::SeqCst);
    }

    pub fn truncate_batch_results(&self, enabled: bool) {
        self.truncate_batches.store(enabled, Ordering::SeqCst);
    }

    pub fn set_log_latency(&self, latency: Option<Duration>) {
        *self.log_latency.lock().unwrap() = latency;
    }

    /// Reject `eth_getLogs` over more than `span` blocks, like hosted providers do
    pub fn set_max_log_span(&self, span: Option<u64>) {
        *self.max_log_span.lock().unwrap() = span;
    }

    /// Fail every `eth_getLogs` starting at or after `block`
    pub fn reject_logs_from(&self, block: Option<u64>) {
        *self.rejected_from.lock().unwrap() = block;
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_count.load(Ordering::SeqCst)
    }

    pub fn log_reads(&self) -> u32 {
        self.log_count.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read(&self, call: &ContractCall) -> Option<U256> {
        if let Ok(read) = capOiCall::abi_decode(&call.data) {
            return self.cap_oi.lock().unwrap().get(&read.market).copied();
        }

        let positions = self.positions.lock().unwrap();
        if let Ok(read) = costCall::abi_decode(&call.data) {
            return positions.get(&(read.market, read.owner, read.id))?.0;
        }
        if let Ok(read) = valueCall::abi_decode(&call.data) {
            return positions.get(&(read.market, read.owner, read.id))?.1;
        }
        None
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn current_block(&self) -> Result<u64, ChainError> {
        if Self::take_failure(&self.failing_block_reads) {
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        Ok(*self.block.lock().unwrap())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        self.log_count.fetch_add(1, Ordering::SeqCst);
        let latency = *self.log_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if Self::take_failure(&self.failing_log_reads) {
            return Err(ChainError::Transport("eth_getLogs: 502 Bad Gateway".to_string()));
        }
        let max_span = *self.max_log_span.lock().unwrap();
        if max_span.is_some_and(|span| filter.span() > span) {
            return Err(ChainError::Rpc {
                code: -32005,
                message: format!("block range too large: {} blocks", filter.span()),
            });
        }

        let rejected_from = *self.rejected_from.lock().unwrap();
        if rejected_from.is_some_and(|block| filter.from_block >= block) {
            return Err(ChainError::Transport("eth_getLogs: header not found".to_string()));
        }

        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().filter(|log| filter.matches(log)).cloned().collect())
    }

    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<RawValue>, ChainError> {
        self.batch_count.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_batches) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            });
        }

        let mut results: Vec<RawValue> = calls
            .iter()
            .map(|call| self.read(call).map(|v| Bytes::from(v.abi_encode())))
            .collect();
        if self.truncate_batches.load(Ordering::SeqCst) {
            results.pop();
        }
        Ok(results)
    }

    async fn call(&self, call: &ContractCall) -> Result<Bytes, ChainError> {
        self.read(call)
            .map(|v| Bytes::from(v.abi_encode()))
            .ok_or_else(|| ChainError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
            })
    }
}

/// Store that keeps records in memory and can be told to fail
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<Vec<SnapshotRecord>>,
    failing_writes: AtomicU32,
}

impl RecordingStore {
    pub fn records(&self) -> Vec<SnapshotRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, times: u32) {
        self.failing_writes.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for RecordingStore {
    async fn create(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        if MockChainReader::take_failure(&self.failing_writes) {
            return Err(StoreError::Database("disk I/O error".to_string()));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
