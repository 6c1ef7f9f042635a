//! Runtime configuration
//!
//! Two sources:
//! - environment variables (`PipelineConfig::from_env`) for process settings
//! - the deployment JSON file (`Deployment::load`) for market and contract
//!   addresses and per-market decimal scales

use super::types::TokenScale;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
    Unreadable(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::Unreadable(msg) => write!(f, "Unreadable configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Deployment file with markets, core contracts and scales
    pub markets_config_path: String,

    pub backend: BackendType,

    /// SQLite database file (sqlite backend)
    pub db_path: String,

    /// Output directory (jsonl backend)
    pub jsonl_dir: String,

    /// Snapshot cycle interval in milliseconds
    pub poll_interval_ms: u64,

    /// New-block polling interval for the build watcher in milliseconds
    pub build_poll_interval_ms: u64,

    /// Upper bound for a single RPC request in milliseconds
    pub rpc_timeout_ms: u64,

    /// Upper bound for one market's whole cycle in milliseconds
    pub cycle_timeout_ms: u64,

    /// First block scanned for every market after startup
    pub floor_block: u64,

    /// Largest block span requested in one `eth_getLogs`
    pub max_block_range: u64,

    pub build_watcher_enabled: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RPC_URL` (required)
    /// - `MARKETS_CONFIG_PATH` (default: config.json)
    /// - `SNAPSHOT_BACKEND` (default: sqlite; `sqlite` or `jsonl`)
    /// - `SNAPSHOT_DB_PATH` (default: data/ovl_analytics.db)
    /// - `SNAPSHOT_JSONL_DIR` (default: data/snapshots)
    /// - `POLL_INTERVAL_MS` (default: 40000)
    /// - `BUILD_POLL_INTERVAL_MS` (default: 12000)
    /// - `RPC_TIMEOUT_MS` (default: 15000)
    /// - `CYCLE_TIMEOUT_MS` (default: 120000)
    /// - `FLOOR_BLOCK` (default: 0)
    /// - `MAX_BLOCK_RANGE` (default: 10000)
    /// - `ENABLE_BUILD_WATCHER` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = env::var("RPC_URL")
            .map_err(|_| ConfigError::MissingVariable("RPC_URL".to_string()))?;

        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "RPC_URL must start with http:// or https://".to_string(),
            ));
        }

        let backend = match env::var("SNAPSHOT_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => BackendType::Sqlite,
            "jsonl" => BackendType::Jsonl,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "SNAPSHOT_BACKEND must be 'sqlite' or 'jsonl', got '{}'",
                    other
                )))
            }
        };

        let config = Self {
            rpc_url,
            markets_config_path: env::var("MARKETS_CONFIG_PATH")
                .unwrap_or_else(|_| "config.json".to_string()),
            backend,
            db_path: env::var("SNAPSHOT_DB_PATH")
                .unwrap_or_else(|_| "data/ovl_analytics.db".to_string()),
            jsonl_dir: env::var("SNAPSHOT_JSONL_DIR")
                .unwrap_or_else(|_| "data/snapshots".to_string()),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", 40_000),
            build_poll_interval_ms: env_or("BUILD_POLL_INTERVAL_MS", 12_000),
            rpc_timeout_ms: env_or("RPC_TIMEOUT_MS", 15_000),
            cycle_timeout_ms: env_or("CYCLE_TIMEOUT_MS", 120_000),
            floor_block: env_or("FLOOR_BLOCK", 0),
            max_block_range: env_or("MAX_BLOCK_RANGE", DEFAULT_MAX_BLOCK_RANGE),
            build_watcher_enabled: env::var("ENABLE_BUILD_WATCHER")
                .ok()
                .and_then(|s| s.to_lowercase().parse().ok())
                .unwrap_or(true),
        };

        for (name, value) in [
            ("POLL_INTERVAL_MS", config.poll_interval_ms),
            ("BUILD_POLL_INTERVAL_MS", config.build_poll_interval_ms),
            ("RPC_TIMEOUT_MS", config.rpc_timeout_ms),
            ("CYCLE_TIMEOUT_MS", config.cycle_timeout_ms),
            ("MAX_BLOCK_RANGE", config.max_block_range),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if config.rpc_timeout_ms > config.cycle_timeout_ms {
            return Err(ConfigError::InvalidValue(format!(
                "RPC_TIMEOUT_MS ({}) must not exceed CYCLE_TIMEOUT_MS ({})",
                config.rpc_timeout_ms, config.cycle_timeout_ms
            )));
        }

        Ok(config)
    }

    /// Endpoint without path, query or credentials, for logging
    ///
    /// Hosted providers put the API key in the path (`/v2/<key>`).
    pub fn rpc_endpoint_for_log(&self) -> String {
        redact_url(&self.rpc_url)
    }
}

/// Default `eth_getLogs` span; most hosted providers accept 10k blocks
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;

fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("<unknown host>");
            let redacted = parsed.path() != "/"
                || parsed.query().is_some()
                || !parsed.username().is_empty()
                || parsed.password().is_some();
            let mut shown = match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            };
            if redacted {
                shown.push_str("/***");
            }
            shown
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

fn env_or(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Decimal exponents of one market's on-chain quantities
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct MarketScale {
    /// Collateral token (cost, value, mint/burn amounts)
    pub collateral_decimals: u32,
    /// Open interest (`capOi`, Build `oi`)
    pub oi_decimals: u32,
}

/// Deployment file layout
#[derive(Debug, Deserialize)]
struct DeploymentFile {
    #[serde(rename = "MARKETS")]
    markets: BTreeMap<String, String>,
    #[serde(rename = "CORE_CONTRACTS")]
    core_contracts: CoreContractsFile,
    #[serde(rename = "MULTI_CALL_CONTRACT_ADDRESS")]
    multicall: String,
    #[serde(rename = "SCALES")]
    scales: BTreeMap<String, MarketScale>,
}

#[derive(Debug, Deserialize)]
struct CoreContractsFile {
    #[serde(rename = "OVERLAY_V1_STATE_CONTRACT_ADDRESS")]
    state: String,
    #[serde(rename = "OVERLAY_V1_TOKEN_CONTRACT_ADDRESS")]
    token: String,
}

/// Shared infrastructure contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreContracts {
    /// Answers `cost`, `value`, `capOi`
    pub state: Address,
    /// Collateral token (mints/burns)
    pub token: Address,
    /// Multicall3 deployment used for batched reads
    pub multicall: Address,
}

/// One tracked market
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    pub name: String,
    pub address: Address,
    pub scale: MarketScale,
}

impl MarketConfig {
    pub fn collateral_scale(&self) -> TokenScale {
        TokenScale::new(self.scale.collateral_decimals)
    }

    pub fn oi_scale(&self) -> TokenScale {
        TokenScale::new(self.scale.oi_decimals)
    }
}

/// Validated contents of the deployment file
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Sorted by market name
    pub markets: Vec<MarketConfig>,
    pub contracts: CoreContracts,
}

impl Deployment {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Unreadable(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: DeploymentFile = serde_json::from_str(json)
            .map_err(|e| ConfigError::Unreadable(format!("deployment file: {}", e)))?;

        if file.markets.is_empty() {
            return Err(ConfigError::InvalidValue("MARKETS must not be empty".to_string()));
        }

        let contracts = CoreContracts {
            state: address_field("OVERLAY_V1_STATE_CONTRACT_ADDRESS", &file.core_contracts.state)?,
            token: address_field("OVERLAY_V1_TOKEN_CONTRACT_ADDRESS", &file.core_contracts.token)?,
            multicall: address_field("MULTI_CALL_CONTRACT_ADDRESS", &file.multicall)?,
        };

        let mut markets = Vec::with_capacity(file.markets.len());
        for (name, address) in &file.markets {
            let scale = file.scales.get(name).copied().ok_or_else(|| {
                ConfigError::InvalidValue(format!("market '{}' has no SCALES entry", name))
            })?;
            markets.push(MarketConfig {
                name: name.clone(),
                address: address_field(name, address)?,
                scale,
            });
        }

        Ok(Self { markets, contracts })
    }

    pub fn market(&self, name: &str) -> Option<&MarketConfig> {
        self.markets.iter().find(|m| m.name == name)
    }
}

fn address_field(field: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: '{}': {}", field, value, e)))
}
