//! Scripted chain reader shared by the integration tests

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use ovl_analytics::chain::overlay::{cap_oi_call, cost_call, log_at, value_call, Build, Transfer};
use ovl_analytics::chain::{ChainError, ChainReader, ContractCall, Log, LogFilter, RawValue};
use std::collections::HashMap;
use std::sync::Mutex;

pub const ONE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);
pub const STATE: Address = Address::new([0x05; 20]);
pub const TOKEN: Address = Address::new([0x0a; 20]);
pub const MULTICALL: Address = Address::new([0xca; 20]);

pub fn tokens(n: u64) -> U256 {
    U256::from(n) * ONE
}

pub const DEPLOYMENT_JSON: &str = r#"{
    "MARKETS": {
        "WETH/USDC": "0x1111111111111111111111111111111111111111"
    },
    "CORE_CONTRACTS": {
        "OVERLAY_V1_STATE_CONTRACT_ADDRESS": "0x0505050505050505050505050505050505050505",
        "OVERLAY_V1_TOKEN_CONTRACT_ADDRESS": "0x0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a"
    },
    "MULTI_CALL_CONTRACT_ADDRESS": "0xcacacacacacacacacacacacacacacacacacacaca",
    "SCALES": {
        "WETH/USDC": { "collateral_decimals": 18, "oi_decimals": 18 }
    }
}"#;

/// Chain state keyed by exact calldata
pub struct ScriptedChain {
    pub head: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    reads: Mutex<HashMap<Bytes, U256>>,
    pub failing_log_reads: Mutex<u32>,
    /// Largest `eth_getLogs` span accepted, if any
    pub max_log_span: Mutex<Option<u64>>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            logs: Mutex::new(Vec::new()),
            reads: Mutex::new(HashMap::new()),
            failing_log_reads: Mutex::new(0),
            max_log_span: Mutex::new(None),
        }
    }

    pub fn open_position(
        &self,
        market: Address,
        owner: Address,
        id: u64,
        oi: U256,
        block: u64,
        cost: U256,
        value: Option<U256>,
    ) {
        let id = U256::from(id);
        let build = Build {
            sender: owner,
            positionId: id,
            oi,
            debt: U256::ZERO,
            isLong: true,
            price: U256::ZERO,
        };
        self.logs
            .lock()
            .unwrap()
            .push(log_at(market, build.encode_log_data(), block));

        let mut reads = self.reads.lock().unwrap();
        reads.insert(cost_call(STATE, market, owner, id).data, cost);
        if let Some(value) = value {
            reads.insert(value_call(STATE, market, owner, id).data, value);
        }
    }

    pub fn transfer(&self, from: Address, to: Address, amount: U256, block: u64) {
        let transfer = Transfer {
            from,
            to,
            value: amount,
        };
        self.logs
            .lock()
            .unwrap()
            .push(log_at(TOKEN, transfer.encode_log_data(), block));
    }

    pub fn set_cap_oi(&self, market: Address, cap_oi: U256) {
        self.reads
            .lock()
            .unwrap()
            .insert(cap_oi_call(STATE, market).data, cap_oi);
    }

    fn read(&self, call: &ContractCall) -> Option<Bytes> {
        self.reads
            .lock()
            .unwrap()
            .get(&call.data)
            .map(|value| Bytes::from(value.abi_encode()))
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn current_block(&self) -> Result<u64, ChainError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        {
            let mut failing = self.failing_log_reads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ChainError::Transport("connection reset by peer".to_string()));
            }
        }
        if let Some(span) = *self.max_log_span.lock().unwrap() {
            if filter.span() > span {
                return Err(ChainError::Rpc {
                    code: -32005,
                    message: "query returned more than 10000 results".to_string(),
                });
            }
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<RawValue>, ChainError> {
        Ok(calls.iter().map(|call| self.read(call)).collect())
    }

    async fn call(&self, call: &ContractCall) -> Result<Bytes, ChainError> {
        self.read(call).ok_or_else(|| ChainError::Rpc {
            code: 3,
            message: "execution reverted".to_string(),
        })
    }
}
