use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Unspecified chain")]
    UnspecifiedChain,

    #[error("Unspecified endpoint")]
    UnspecifiedEndpoint,

    #[error("Invalid chain name: {0}")]
    InvalidChainName(String),

    #[error("Chain not supported: {0}")]
    ChainNotSupported(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

impl From<ChainError> for wordpool_core::error::Error {
    fn from(value: ChainError) -> Self {
        match value {
            ChainError::InvalidChainName(name) | ChainError::ChainNotSupported(name) => {
                Self::UnsupportedChain(name)
            }
            other => Self::RpcError(other.to_string()),
        }
    }
}
