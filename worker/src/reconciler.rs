//! The ingestion worker. Tails the custodial wallet, routes each
//! inbound transfer through the comment grammar and commits the
//! matching state transition. Strictly ordered by logical time; the
//! watermark in `chain_state` only advances past fully applied
//! transactions, so a crash replays and the hash dedup makes the
//! replay a no-op.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use wordpool_core::chain::{ChainT, ChainTx};
use wordpool_core::comment::{is_withdraw_comment, CommentKind, PaymentComment};
use wordpool_core::error::{ErrorKind, Result};
use wordpool_core::now_secs;
use wordpool_core::store::{CreditDepositParams, LedgerT, OpenLobbyParams};
use wordpool_env::WorkerConfig;

use crate::common::{CloseReason, Component, ComponentEnv, PipelinePorts};
use crate::frame::WorkerFrame;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BATCH_LIMIT: usize = 100;

pub struct ReconcilerContext {
    chain: Arc<dyn ChainT>,
    ledger: Arc<dyn LedgerT>,
    chain_id: String,
    poll_interval: Duration,
    batch_limit: usize,
    /// Flips once shutdown is broadcast; checked between transactions
    /// so a backlog catch-up exits after the current one.
    cancel: watch::Receiver<bool>,
}

pub struct Reconciler {}

impl Reconciler {
    pub fn init(
        chain: Arc<dyn ChainT>,
        ledger: Arc<dyn LedgerT>,
        chain_id: &str,
        poll_interval_secs: Option<u64>,
        config: Option<&WorkerConfig>,
        cancel: watch::Receiver<bool>,
    ) -> (Self, ReconcilerContext) {
        let poll_interval =
            Duration::from_secs(poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS));
        let batch_limit = config
            .and_then(|c| c.reconcile_batch_limit)
            .unwrap_or(DEFAULT_BATCH_LIMIT);
        (
            Self {},
            ReconcilerContext {
                chain,
                ledger,
                chain_id: chain_id.to_string(),
                poll_interval,
                batch_limit,
                cancel,
            },
        )
    }
}

/// How one wallet transfer was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Hash already in the ledger; replay is a no-op.
    Skipped,
    GameDeposit,
    LobbyOpened,
    UserDeposit,
    /// Quarantined at `status=pending` for manual adjudication.
    Unmatched,
    WithdrawFinalized,
    /// Outgoing transfer with no matching withdrawal.
    OutgoingIgnored,
}

impl Applied {
    fn counts(&self) -> bool {
        !matches!(self, Applied::Skipped | Applied::OutgoingIgnored)
    }
}

/// Route one transfer. Validation and state conflicts quarantine the
/// row and succeed; transient and fatal errors propagate so the
/// watermark never advances past the transaction.
pub async fn apply_tx(ledger: &Arc<dyn LedgerT>, tx: &ChainTx) -> Result<Applied> {
    if ledger.tx_seen(&tx.hash).await? {
        return Ok(Applied::Skipped);
    }

    if !tx.is_incoming {
        if let Some(comment) = tx.comment.as_deref() {
            if is_withdraw_comment(comment)
                && ledger.finalize_withdraw(comment, &tx.hash, tx.lt).await?
            {
                return Ok(Applied::WithdrawFinalized);
            }
        }
        return Ok(Applied::OutgoingIgnored);
    }

    let parsed = tx.comment.as_deref().and_then(PaymentComment::parse);
    match parsed {
        Some(comment) => {
            let game = match ledger.get_game_by_short_id(&comment.short_id).await {
                Ok(game) => game,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    ledger.record_unmatched(tx, "unknown game short id").await?;
                    return Ok(Applied::Unmatched);
                }
                Err(e) => return Err(e),
            };
            let applied = match comment.kind {
                CommentKind::GameDeposit => ledger
                    .credit_game_deposit(CreditDepositParams {
                        game_id: game.id,
                        currency: tx.currency,
                        amount: tx.amount,
                        tx_hash: tx.hash.clone(),
                        lt: tx.lt,
                        from_addr: tx.from.clone(),
                    })
                    .await
                    .map(|_| Applied::GameDeposit),
                CommentKind::LobbyBet => {
                    let Some(user) = ledger.find_user_by_wallet(&tx.from).await? else {
                        ledger.record_unmatched(tx, "unknown sender wallet").await?;
                        return Ok(Applied::Unmatched);
                    };
                    ledger
                        .open_lobby(OpenLobbyParams {
                            game_id: game.id,
                            user_id: user.id,
                            amount: tx.amount,
                            currency: tx.currency,
                            tx_hash: tx.hash.clone(),
                            lt: tx.lt,
                            now: now_secs(),
                        })
                        .await
                        .map(|_| Applied::LobbyOpened)
                }
            };
            match applied {
                Ok(applied) => {
                    if applied == Applied::LobbyOpened {
                        if let Some(c) = tx.comment.as_deref() {
                            ledger.complete_pending_payment(c).await?;
                        }
                    }
                    Ok(applied)
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Validation
                            | ErrorKind::Conflict
                            | ErrorKind::InsufficientFunds
                    ) =>
                {
                    ledger.record_unmatched(tx, &e.to_string()).await?;
                    Ok(Applied::Unmatched)
                }
                Err(e) => Err(e),
            }
        }
        None => match ledger.find_user_by_wallet(&tx.from).await? {
            Some(user) => {
                ledger.record_user_deposit(user.id, tx).await?;
                Ok(Applied::UserDeposit)
            }
            None => {
                ledger
                    .record_unmatched(tx, "no comment and unknown sender wallet")
                    .await?;
                Ok(Applied::Unmatched)
            }
        },
    }
}

/// One tick: fetch the next batch and apply it in lt order. Returns
/// the number of applied transfers and whether the page was full (a
/// full page means more work is waiting and the next round should run
/// immediately). Cancellation is re-checked before every transaction:
/// the one in flight finishes atomically, the rest stay beyond the
/// watermark for the next start.
pub async fn reconcile_once(ctx: &ReconcilerContext) -> Result<(usize, bool)> {
    let last_lt = ctx.ledger.last_lt(&ctx.chain_id).await?;
    let mut batch = ctx
        .chain
        .list_new_transactions(last_lt, ctx.batch_limit)
        .await?;
    batch.sort_by_key(|tx| tx.lt);
    let full_page = batch.len() >= ctx.batch_limit;

    let mut applied = 0;
    for tx in &batch {
        if *ctx.cancel.borrow() {
            return Ok((applied, false));
        }
        let outcome = apply_tx(&ctx.ledger, tx).await?;
        if outcome.counts() {
            applied += 1;
        }
        ctx.ledger.advance_last_lt(&ctx.chain_id, tx.lt).await?;
    }
    Ok((applied, full_page))
}

#[async_trait]
impl Component<PipelinePorts, ReconcilerContext> for Reconciler {
    fn name() -> &'static str {
        "Reconciler"
    }

    async fn run(
        mut ports: PipelinePorts,
        ctx: ReconcilerContext,
        env: ComponentEnv,
    ) -> CloseReason {
        info!(
            "{} Tail wallet on {}, poll interval {:?}",
            env.log_prefix, ctx.chain_id, ctx.poll_interval
        );
        let producer = ports.clone_as_producer();
        loop {
            select! {
                frame = ports.recv() => {
                    match frame {
                        Some(WorkerFrame::Shutdown) | None => break,
                        _ => continue,
                    }
                }
                _ = sleep(ctx.poll_interval) => {
                    // Catch-up drain. reconcile_once watches the cancel
                    // flag, so a shutdown mid-backlog falls through to
                    // the frame read above after the current transfer.
                    loop {
                        match reconcile_once(&ctx).await {
                            Ok((applied, full_page)) => {
                                if applied > 0 {
                                    info!(
                                        "{} Applied {} inbound transfers",
                                        env.log_prefix, applied
                                    );
                                    producer
                                        .send(WorkerFrame::InboundApplied { count: applied })
                                        .await;
                                }
                                if !full_page {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Non-fatal: log and retry on the next
                                // tick without advancing the watermark.
                                warn!("{} Reconcile error: {}", env.log_prefix, e);
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("{} Stopped", env.log_prefix);
        CloseReason::Complete
    }
}
