//! The chain provider contract: a uniform read/write capability set
//! over the custodial wallet of one chain. Implementations live in the
//! `wordpool-chain` crate and never mutate application state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::Result;
use crate::types::Currency;

/// One transfer observed on the custodial wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTx {
    pub hash: String,
    /// Per-account logical time; strictly increasing, the reconciler's
    /// watermark.
    pub lt: u64,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub currency: Currency,
    pub comment: Option<String>,
    pub timestamp: u64,
    pub is_incoming: bool,
    pub fee: Amount,
}

#[async_trait]
pub trait ChainT: Send + Sync {
    /// List wallet transactions with `lt > after_lt`, ordered by
    /// strictly increasing `lt`. The first call with `after_lt = 0`
    /// returns the most recent batch as a baseline.
    ///
    /// # Returns
    /// * [`crate::error::Error::RpcError`] when the node call failed;
    ///   the caller retries on the next tick.
    async fn list_new_transactions(&self, after_lt: u64, limit: usize) -> Result<Vec<ChainTx>>;

    /// Submit one outbound transfer. Returns a local submission id
    /// before on-chain finality; finalization is observed through
    /// subsequent listing.
    ///
    /// # Returns
    /// * [`crate::error::Error::InvalidAddress`] for a malformed `to`.
    /// * [`crate::error::Error::UnsupportedCurrency`] when the chain
    ///   cannot move this currency.
    /// * [`crate::error::Error::RpcError`] when the node call failed.
    async fn send(
        &self,
        to: &str,
        amount: Amount,
        currency: Currency,
        comment: &str,
    ) -> Result<String>;

    fn validate_address(&self, addr: &str) -> bool;

    fn min_withdraw(&self, currency: Currency) -> Amount;

    /// Flat network fee charged on a withdrawal of `amount`.
    fn fee(&self, currency: Currency, amount: Amount) -> Amount;

    fn required_confirmations(&self) -> u32;

    fn supported_currencies(&self) -> Vec<Currency>;
}
