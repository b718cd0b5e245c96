//! Configuration of application

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tokio::{fs::File, io::AsyncReadExt};

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 12_100 }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file; `:memory:` for ephemeral runs.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "wordpool.db".into(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ChainConfig {
    /// One of the supported chains: "ton" or "evm".
    pub network: String,
    /// Use the in-memory mock provider instead of a live node.
    #[serde(default)]
    pub use_mock: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: "ton".into(),
            use_mock: false,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TonConfig {
    /// HTTP API of the node/wallet daemon serving the custodial wallet.
    pub api_endpoint: String,
    /// Address of the custodial wallet all inbound funds land on.
    pub master_wallet: String,
    /// Seed handed to the colocated wallet daemon for outbound signing.
    pub master_wallet_seed: String,
    /// Minimum withdrawal in nano units.
    pub min_withdraw: u64,
    /// Flat withdrawal fee in nano units.
    pub withdraw_fee: u64,
    pub required_confirmations: u32,
    pub poll_interval_secs: Option<u64>,
    /// Commission taken from each payout, in basis points.
    pub commission_rate_bps: u32,
    #[serde(default)]
    pub testnet: bool,
}

impl Default for TonConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "http://127.0.0.1:12101".into(),
            master_wallet: String::new(),
            master_wallet_seed: String::new(),
            min_withdraw: 1_000_000_000,
            withdraw_fee: 50_000_000,
            required_confirmations: 1,
            poll_interval_secs: None,
            commission_rate_bps: 500,
            testnet: false,
        }
    }
}

/// Worker tuning; unset fields fall back to per-component defaults.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct WorkerConfig {
    pub reconcile_batch_limit: Option<usize>,
    pub payout_interval_secs: Option<u64>,
    pub payout_batch_limit: Option<usize>,
    pub payout_max_attempts: Option<u32>,
    pub sweep_interval_secs: Option<u64>,
    pub sweep_batch_limit: Option<usize>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct LogConfig {
    pub level: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub ton: TonConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub async fn from_path(path: &PathBuf) -> anyhow::Result<Config> {
        let mut buf = Vec::with_capacity(1024);
        let mut f = File::open(path)
            .await
            .with_context(|| format!("Config file not found: {:?}", path))?;
        f.read_to_end(&mut buf)
            .await
            .context("Failed to read config file")?;
        toml::from_slice(&buf).context("Invalid config file")
    }
}
