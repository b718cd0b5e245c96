use crate::error::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    Ton,
    Evm,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Ton => "ton",
            ChainType::Evm => "evm",
        }
    }
}

impl TryFrom<&str> for ChainType {
    type Error = ChainError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "ton" => Ok(Self::Ton),
            "evm" => Ok(Self::Evm),
            _ => Err(ChainError::InvalidChainName(value.into())),
        }
    }
}
