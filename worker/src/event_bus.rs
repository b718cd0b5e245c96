//! An event bus that fans frames out to the attached components.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, warn};

use crate::common::Attachable;
use crate::frame::WorkerFrame;

pub struct EventBus {
    tx: mpsc::Sender<WorkerFrame>,
    attached_txs: Arc<Mutex<Vec<(String, mpsc::Sender<WorkerFrame>)>>>,
    close_rx: watch::Receiver<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        let (close_tx, close_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel::<WorkerFrame>(32);
        let txs: Arc<Mutex<Vec<(String, mpsc::Sender<WorkerFrame>)>>> =
            Arc::new(Mutex::new(vec![]));
        let attached_txs = txs.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let txs = attached_txs.lock().await;
                for (id, t) in txs.iter() {
                    if t.send(frame.clone()).await.is_err() {
                        warn!("Failed to send frame {} to component {}", frame, id);
                    }
                }
                if matches!(frame, WorkerFrame::Shutdown) {
                    let _ = close_tx.send(true);
                    break;
                }
            }
        });
        Self {
            tx,
            attached_txs: txs,
            close_rx,
        }
    }

    pub async fn attach<T>(&self, attachable: &mut T)
    where
        T: Attachable,
    {
        let mut close_rx = self.close_rx.clone();
        if let Some(mut rx) = attachable.output() {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = close_rx.changed() => {
                            break;
                        }
                        frame = rx.recv() => {
                            let Some(frame) = frame else { break };
                            if let Err(e) = tx.send(frame).await {
                                error!("Failed to forward frame: {:?}", e);
                                break;
                            }
                        }
                    }
                }
            });
        }

        if let Some(tx) = attachable.input() {
            let mut txs = self.attached_txs.lock().await;
            txs.push((attachable.id().to_string(), tx));
        }
    }

    pub async fn send(&self, frame: WorkerFrame) {
        if let Err(e) = self.tx.send(frame).await {
            error!("An error occurred when sending frame, {}", e.to_string());
        }
    }

    /// A watch that flips once `Shutdown` has been broadcast. Long
    /// drains poll it between items so cancellation is observed
    /// without waiting for the next frame read.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.close_rx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
