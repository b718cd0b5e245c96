//! Expiry sweeper: settles lobbies whose deadline passed and expires
//! stale pending payments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::time::sleep;
use tracing::{info, warn};

use wordpool_core::error::Result;
use wordpool_core::now_secs;
use wordpool_core::store::{ExpiryResolution, LedgerT};
use wordpool_env::WorkerConfig;

use crate::common::{CloseReason, Component, ComponentEnv, ConsumerPorts};
use crate::frame::WorkerFrame;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SWEEP_BATCH_LIMIT: usize = 100;

pub struct SweeperContext {
    ledger: Arc<dyn LedgerT>,
    interval: Duration,
    batch_limit: usize,
}

pub struct Sweeper {}

impl Sweeper {
    pub fn init(ledger: Arc<dyn LedgerT>, config: Option<&WorkerConfig>) -> (Self, SweeperContext) {
        let interval = Duration::from_secs(
            config
                .and_then(|c| c.sweep_interval_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );
        let batch_limit = config
            .and_then(|c| c.sweep_batch_limit)
            .unwrap_or(DEFAULT_SWEEP_BATCH_LIMIT);
        (
            Self {},
            SweeperContext {
                ledger,
                interval,
                batch_limit,
            },
        )
    }
}

/// One sweep round: returns (settled lobbies, expired payments).
pub async fn sweep_once(ctx: &SweeperContext, now: u64) -> Result<(usize, usize)> {
    let lobbies = ctx.ledger.expired_active_lobbies(now, ctx.batch_limit).await?;
    let mut settled = 0;
    for lobby in lobbies {
        match ctx.ledger.expire_lobby(lobby.id, now).await {
            Ok(expired) => {
                settled += 1;
                match expired.resolution {
                    ExpiryResolution::Refunded(amount) => {
                        info!("Lobby {} expired, refunded {}", lobby.id, amount)
                    }
                    ExpiryResolution::Forfeited => {
                        info!("Lobby {} expired, forfeited", lobby.id)
                    }
                }
            }
            // An attempt may have settled the lobby between the scan
            // and the write; skip and move on.
            Err(e) => warn!("Failed to expire lobby {}: {}", lobby.id, e),
        }
    }
    let payments = ctx.ledger.expire_pending_payments(now).await?;
    Ok((settled, payments))
}

#[async_trait]
impl Component<ConsumerPorts, SweeperContext> for Sweeper {
    fn name() -> &'static str {
        "Sweeper"
    }

    async fn run(mut ports: ConsumerPorts, ctx: SweeperContext, env: ComponentEnv) -> CloseReason {
        info!("{} Start, sweep interval {:?}", env.log_prefix, ctx.interval);
        loop {
            select! {
                frame = ports.recv() => {
                    match frame {
                        Some(WorkerFrame::Shutdown) | None => break,
                        _ => continue,
                    }
                }
                _ = sleep(ctx.interval) => {
                    match sweep_once(&ctx, now_secs()).await {
                        Ok((lobbies, payments)) if lobbies > 0 || payments > 0 => {
                            info!(
                                "{} Swept {} lobbies, {} pending payments",
                                env.log_prefix, lobbies, payments
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!("{} Sweep error: {}", env.log_prefix, e),
                    }
                }
            }
        }
        info!("{} Stopped", env.log_prefix);
        CloseReason::Complete
    }
}
