//! The withdrawal pipeline. Drains pending withdrawals oldest first,
//! submits one outbound transfer per row and never submits a row
//! twice: the claim transition (`pending -> confirming`) happens in the
//! store before the node is called, and a failed call either releases
//! the row with a bumped attempt counter or fails it outright.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::time::sleep;
use tracing::{info, warn};

use wordpool_core::chain::ChainT;
use wordpool_core::error::Result;
use wordpool_core::store::LedgerT;
use wordpool_env::WorkerConfig;

use crate::common::{CloseReason, Component, ComponentEnv, ConsumerPorts};
use crate::frame::WorkerFrame;

pub const DEFAULT_PAYOUT_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_PAYOUT_BATCH_LIMIT: usize = 10;
pub const DEFAULT_PAYOUT_MAX_ATTEMPTS: u32 = 5;

pub struct SubmitterContext {
    chain: Arc<dyn ChainT>,
    ledger: Arc<dyn LedgerT>,
    interval: Duration,
    batch_limit: usize,
    max_attempts: u32,
}

pub struct Submitter {}

impl Submitter {
    pub fn init(
        chain: Arc<dyn ChainT>,
        ledger: Arc<dyn LedgerT>,
        config: Option<&WorkerConfig>,
    ) -> (Self, SubmitterContext) {
        let interval = Duration::from_secs(
            config
                .and_then(|c| c.payout_interval_secs)
                .unwrap_or(DEFAULT_PAYOUT_INTERVAL_SECS),
        );
        let batch_limit = config
            .and_then(|c| c.payout_batch_limit)
            .unwrap_or(DEFAULT_PAYOUT_BATCH_LIMIT);
        let max_attempts = config
            .and_then(|c| c.payout_max_attempts)
            .unwrap_or(DEFAULT_PAYOUT_MAX_ATTEMPTS);
        (
            Self {},
            SubmitterContext {
                chain,
                ledger,
                interval,
                batch_limit,
                max_attempts,
            },
        )
    }
}

/// One drain round. Returns the number of transfers handed to the node.
pub async fn drain_once(ctx: &SubmitterContext) -> Result<usize> {
    let claimed = ctx.ledger.claim_pending_withdrawals(ctx.batch_limit).await?;
    let mut submitted = 0;
    for entry in claimed {
        let Some(net) = entry.amount.checked_sub(entry.fee) else {
            ctx.ledger
                .fail_withdraw(entry.id, "fee exceeds amount")
                .await?;
            continue;
        };
        let to = entry.to_addr.clone().unwrap_or_default();
        let comment = entry.comment.clone().unwrap_or_default();
        match ctx.chain.send(&to, net, entry.currency, &comment).await {
            Ok(submission_id) => {
                ctx.ledger
                    .record_withdraw_submission(entry.id, &submission_id)
                    .await?;
                info!(
                    "Submitted withdrawal {} ({} to {})",
                    entry.id, net, to
                );
                submitted += 1;
            }
            Err(e) if e.is_transient() => {
                let release = ctx
                    .ledger
                    .release_withdrawal(entry.id, ctx.max_attempts, &e.to_string())
                    .await?;
                if release.failed {
                    warn!(
                        "Withdrawal {} failed after {} attempts: {}",
                        entry.id, release.attempts, e
                    );
                } else {
                    warn!(
                        "Withdrawal {} released for retry (attempt {}): {}",
                        entry.id, release.attempts, e
                    );
                }
            }
            Err(e) => {
                // Malformed address or unsupported currency: no retry
                // can help, refund the user.
                ctx.ledger.fail_withdraw(entry.id, &e.to_string()).await?;
                warn!("Withdrawal {} rejected: {}", entry.id, e);
            }
        }
    }
    Ok(submitted)
}

#[async_trait]
impl Component<ConsumerPorts, SubmitterContext> for Submitter {
    fn name() -> &'static str {
        "Submitter"
    }

    async fn run(
        mut ports: ConsumerPorts,
        ctx: SubmitterContext,
        env: ComponentEnv,
    ) -> CloseReason {
        info!("{} Start, drain interval {:?}", env.log_prefix, ctx.interval);
        loop {
            let drain = select! {
                frame = ports.recv() => {
                    match frame {
                        Some(WorkerFrame::WithdrawQueued) => true,
                        Some(WorkerFrame::Shutdown) | None => break,
                        _ => false,
                    }
                }
                _ = sleep(ctx.interval) => true,
            };
            if !drain {
                continue;
            }
            if let Err(e) = drain_once(&ctx).await {
                warn!("{} Drain error: {}", env.log_prefix, e);
            }
        }
        info!("{} Stopped", env.log_prefix);
        CloseReason::Complete
    }
}
