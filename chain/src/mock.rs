//! An in-memory provider for testing and development. Deterministic:
//! logical time advances by a fixed step and hashes derive from it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wordpool_core::amount::Amount;
use wordpool_core::chain::{ChainT, ChainTx};
use wordpool_core::error::{Error, Result};
use wordpool_core::types::Currency;

const LT_STEP: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub to: String,
    pub amount: Amount,
    pub currency: Currency,
    pub comment: String,
    pub submission_id: String,
}

#[derive(Default)]
struct Inner {
    txs: Vec<ChainTx>,
    sent: Vec<SentTransfer>,
    next_lt: u64,
    fail_sends: u32,
}

pub struct MockChain {
    inner: Arc<Mutex<Inner>>,
    wallet: String,
    min_withdraw: Amount,
    withdraw_fee: Amount,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_lt: 100,
                ..Default::default()
            })),
            wallet: "mock_master".into(),
            min_withdraw: 1_000_000_000,
            withdraw_fee: 50_000_000,
        }
    }
}

impl MockChain {
    pub fn with_limits(min_withdraw: Amount, withdraw_fee: Amount) -> Self {
        Self {
            min_withdraw,
            withdraw_fee,
            ..Default::default()
        }
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    /// Simulate an inbound transfer landing on the custodial wallet.
    /// Returns the transaction as it will be listed.
    pub fn simulate_incoming(
        &self,
        from: &str,
        amount: Amount,
        currency: Currency,
        comment: Option<&str>,
    ) -> ChainTx {
        let mut inner = self.inner.lock().unwrap();
        let lt = inner.next_lt;
        inner.next_lt += LT_STEP;
        let tx = ChainTx {
            hash: format!("mockhash-{lt}"),
            lt,
            from: from.into(),
            to: self.wallet.clone(),
            amount,
            currency,
            comment: comment.map(Into::into),
            timestamp: 1_700_000_000 + lt,
            is_incoming: true,
            fee: 0,
        };
        inner.txs.push(tx.clone());
        tx
    }

    /// Simulate an inbound transfer with an explicit lt and hash, for
    /// exercising ordering and idempotency.
    pub fn simulate_incoming_at(
        &self,
        lt: u64,
        hash: &str,
        from: &str,
        amount: Amount,
        comment: Option<&str>,
    ) -> ChainTx {
        let mut inner = self.inner.lock().unwrap();
        inner.next_lt = inner.next_lt.max(lt + LT_STEP);
        let tx = ChainTx {
            hash: hash.into(),
            lt,
            from: from.into(),
            to: self.wallet.clone(),
            amount,
            currency: Currency::Ton,
            comment: comment.map(Into::into),
            timestamp: 1_700_000_000 + lt,
            is_incoming: true,
            fee: 0,
        };
        inner.txs.push(tx.clone());
        tx
    }

    /// Make a previously submitted transfer appear on chain, the way a
    /// real node would list it once it finalizes.
    pub fn confirm_sent(&self, submission_id: &str) -> Option<ChainTx> {
        let mut inner = self.inner.lock().unwrap();
        let sent = inner
            .sent
            .iter()
            .find(|s| s.submission_id == submission_id)?
            .clone();
        let lt = inner.next_lt;
        inner.next_lt += LT_STEP;
        let tx = ChainTx {
            hash: format!("mockhash-{lt}"),
            lt,
            from: self.wallet.clone(),
            to: sent.to.clone(),
            amount: sent.amount,
            currency: sent.currency,
            comment: Some(sent.comment.clone()),
            timestamp: 1_700_000_000 + lt,
            is_incoming: false,
            fee: 1_000_000,
        };
        inner.txs.push(tx.clone());
        Some(tx)
    }

    pub fn sent_transfers(&self) -> Vec<SentTransfer> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Fail the next `n` sends with a transient node error.
    pub fn fail_next_sends(&self, n: u32) {
        self.inner.lock().unwrap().fail_sends = n;
    }
}

#[async_trait]
impl ChainT for MockChain {
    async fn list_new_transactions(&self, after_lt: u64, limit: usize) -> Result<Vec<ChainTx>> {
        let inner = self.inner.lock().unwrap();
        let mut txs: Vec<ChainTx> = inner
            .txs
            .iter()
            .filter(|tx| tx.lt > after_lt)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.lt);
        if after_lt == 0 && txs.len() > limit {
            // Baseline semantics: the most recent batch.
            txs = txs.split_off(txs.len() - limit);
        } else {
            txs.truncate(limit);
        }
        Ok(txs)
    }

    async fn send(
        &self,
        to: &str,
        amount: Amount,
        currency: Currency,
        comment: &str,
    ) -> Result<String> {
        if !self.validate_address(to) {
            return Err(Error::InvalidAddress(to.into()));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(Error::RpcError("mock node unavailable".into()));
        }
        let submission_id = format!("sub-{}", inner.sent.len() + 1);
        inner.sent.push(SentTransfer {
            to: to.into(),
            amount,
            currency,
            comment: comment.into(),
            submission_id: submission_id.clone(),
        });
        Ok(submission_id)
    }

    fn validate_address(&self, addr: &str) -> bool {
        !addr.is_empty()
            && !addr.starts_with('!')
            && addr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
    }

    fn min_withdraw(&self, _currency: Currency) -> Amount {
        self.min_withdraw
    }

    fn fee(&self, _currency: Currency, _amount: Amount) -> Amount {
        self.withdraw_fee
    }

    fn required_confirmations(&self) -> u32 {
        1
    }

    fn supported_currencies(&self) -> Vec<Currency> {
        vec![Currency::Ton, Currency::Usdt]
    }
}
