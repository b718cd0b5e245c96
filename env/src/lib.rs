mod config;

pub use config::{
    ChainConfig, Config, DatabaseConfig, LogConfig, ServerConfig, TonConfig, WorkerConfig,
};
