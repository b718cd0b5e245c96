use std::sync::Arc;

use tracing::info;

use wordpool_core::chain::ChainT;
use wordpool_env::Config;

use crate::chain_type::ChainType;
use crate::error::{ChainError, ChainResult};
use crate::mock::MockChain;
use crate::ton::TonAdapter;

#[derive(Default)]
pub struct ChainBuilder {
    chain: Option<ChainType>,
    use_mock: bool,
}

impl ChainBuilder {
    pub fn with_chain(mut self, chain: ChainType) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn try_with_chain<T>(mut self, chain: T) -> ChainResult<Self>
    where
        T: TryInto<ChainType, Error = ChainError>,
    {
        self.chain = Some(chain.try_into()?);
        Ok(self)
    }

    pub fn with_mock(mut self, use_mock: bool) -> Self {
        self.use_mock = use_mock;
        self
    }

    pub fn build(self, config: &Config) -> ChainResult<Arc<dyn ChainT>> {
        if self.use_mock {
            info!("Build MockChain provider");
            return Ok(Arc::new(MockChain::default()));
        }
        match self.chain {
            Some(ChainType::Ton) => {
                info!("Build TonAdapter for {}", config.ton.api_endpoint);
                Ok(Arc::new(TonAdapter::try_new(&config.ton)?))
            }
            Some(ChainType::Evm) => {
                // Extension point; no EVM node contract is wired yet.
                Err(ChainError::ChainNotSupported("evm".into()))
            }
            None => Err(ChainError::UnspecifiedChain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock() {
        let config = Config::default();
        let chain = ChainBuilder::default()
            .try_with_chain("ton")
            .unwrap()
            .with_mock(true)
            .build(&config)
            .unwrap();
        assert_eq!(chain.required_confirmations(), 1);
    }

    #[test]
    fn test_build_rejects_evm() {
        let config = Config::default();
        let res = ChainBuilder::default()
            .with_chain(ChainType::Evm)
            .build(&config);
        assert!(matches!(res, Err(ChainError::ChainNotSupported(_))));
    }

    #[test]
    fn test_build_requires_chain() {
        let config = Config::default();
        assert!(matches!(
            ChainBuilder::default().build(&config),
            Err(ChainError::UnspecifiedChain)
        ));
    }
}
