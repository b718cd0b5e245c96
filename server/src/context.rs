//! Application runtime context: builds the chain adapter and the
//! ledger, starts the background components on a shared event bus and
//! coordinates shutdown.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use wordpool_chain::{ChainBuilder, ChainType};
use wordpool_core::chain::ChainT;
use wordpool_core::error::{Error, Result};
use wordpool_core::store::LedgerT;
use wordpool_env::Config;
use wordpool_ledger::SqliteLedger;
use wordpool_worker::{
    Component, EventBus, PortsHandle, Reconciler, Submitter, Sweeper, WorkerFrame,
};

use crate::service::GameService;

pub struct ApplicationContext {
    pub config: Config,
    pub chain: Arc<dyn ChainT>,
    pub ledger: Arc<dyn LedgerT>,
    pub service: Arc<GameService>,
    pub bus: Arc<EventBus>,
    handles: Mutex<Vec<PortsHandle>>,
}

impl ApplicationContext {
    pub async fn try_new(config: Config) -> Result<Self> {
        info!("Initialize application context");

        let chain_type = ChainType::try_from(config.chain.network.as_str())
            .map_err(Error::from)?;
        let chain = ChainBuilder::default()
            .with_chain(chain_type)
            .with_mock(config.chain.use_mock)
            .build(&config)
            .map_err(Error::from)?;

        let ledger: Arc<dyn LedgerT> = Arc::new(SqliteLedger::try_new(
            &config.database.path,
            config.ton.commission_rate_bps,
        )?);

        let bus = Arc::new(EventBus::new());
        let service = Arc::new(GameService::new(
            ledger.clone(),
            chain.clone(),
            bus.clone(),
            config.ton.master_wallet.clone(),
        ));

        let mut handles = Vec::new();

        let (reconciler, reconciler_ctx) = Reconciler::init(
            chain.clone(),
            ledger.clone(),
            chain_type.as_str(),
            config.ton.poll_interval_secs,
            Some(&config.worker),
            bus.closed(),
        );
        let mut handle = reconciler.start("main", reconciler_ctx);
        bus.attach(&mut handle).await;
        handles.push(handle);

        let (submitter, submitter_ctx) =
            Submitter::init(chain.clone(), ledger.clone(), Some(&config.worker));
        let mut handle = submitter.start("main", submitter_ctx);
        bus.attach(&mut handle).await;
        handles.push(handle);

        let (sweeper, sweeper_ctx) = Sweeper::init(ledger.clone(), Some(&config.worker));
        let mut handle = sweeper.start("main", sweeper_ctx);
        bus.attach(&mut handle).await;
        handles.push(handle);

        Ok(Self {
            config,
            chain,
            ledger,
            service,
            bus,
            handles: Mutex::new(handles),
        })
    }

    /// Broadcast shutdown and wait for every component to finish its
    /// current item and exit.
    pub async fn shutdown(&self) {
        info!("Shutting down, waiting for components");
        self.bus.send(WorkerFrame::Shutdown).await;
        let mut handles = self.handles.lock().await;
        for handle in handles.iter_mut() {
            handle.wait().await;
        }
        info!("All components stopped");
    }
}
