//! The component runtime: a component is a long-lived task attached to
//! the event bus through typed ports. Cancellation is cooperative; a
//! component observes `Shutdown`, finishes its current item and
//! returns a [`CloseReason`].

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{self, error::SendError},
    oneshot,
};
use tracing::{error, info, warn};

use wordpool_core::error::Error;

use crate::frame::WorkerFrame;

const PORT_DEPTH: usize = 16;

/// Reason a component stopped.
#[derive(Debug, Clone)]
pub enum CloseReason {
    Complete,
    Fault(Error),
}

#[derive(Debug, Clone, Default)]
pub struct ComponentEnv {
    pub log_prefix: String,
}

impl ComponentEnv {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            log_prefix: format!("[{id}|{name}]"),
        }
    }
}

/// An interface for a component that can be attached to the event bus.
pub trait Attachable {
    fn id(&self) -> &str;

    /// The input channel of the component; `None` means it accepts no
    /// input.
    fn input(&mut self) -> Option<mpsc::Sender<WorkerFrame>>;

    /// The output channel of the component, handed over at most once.
    fn output(&mut self) -> Option<mpsc::Receiver<WorkerFrame>>;
}

/// The channels of a started component.
pub struct PortsHandle {
    id: String,
    input_tx: Option<mpsc::Sender<WorkerFrame>>,
    output_rx: Option<mpsc::Receiver<WorkerFrame>>,
    close_rx: Option<oneshot::Receiver<CloseReason>>,
}

impl PortsHandle {
    pub async fn wait(&mut self) -> CloseReason {
        let Some(rx) = self.close_rx.take() else {
            panic!("Component {} is already awaited", self.id);
        };
        match rx.await {
            Ok(CloseReason::Complete) => CloseReason::Complete,
            Ok(CloseReason::Fault(e)) => {
                error!("Component {} faulted: {}", self.id, e);
                CloseReason::Fault(e)
            }
            Err(_) => CloseReason::Complete,
        }
    }

    #[allow(dead_code)]
    pub async fn send_unchecked(&self, frame: WorkerFrame) {
        let Some(ref input_tx) = self.input_tx else {
            panic!("Component {} accepts no input", self.id);
        };
        input_tx.send(frame).await.expect("Failed to send");
    }

    #[allow(dead_code)]
    pub async fn recv_unchecked(&mut self) -> Option<WorkerFrame> {
        let Some(ref mut output_rx) = self.output_rx else {
            panic!("Component {} produces no output", self.id);
        };
        output_rx.recv().await
    }
}

impl Attachable for PortsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn input(&mut self) -> Option<mpsc::Sender<WorkerFrame>> {
        self.input_tx.clone()
    }

    fn output(&mut self) -> Option<mpsc::Receiver<WorkerFrame>> {
        self.output_rx.take()
    }
}

pub trait Ports: Send {
    fn create(id: &str) -> (Self, oneshot::Sender<CloseReason>, PortsHandle)
    where
        Self: Sized;
}

/// Input-only ports.
pub struct ConsumerPorts {
    rx: mpsc::Receiver<WorkerFrame>,
}

impl ConsumerPorts {
    pub async fn recv(&mut self) -> Option<WorkerFrame> {
        self.rx.recv().await
    }
}

impl Ports for ConsumerPorts {
    fn create(id: &str) -> (Self, oneshot::Sender<CloseReason>, PortsHandle) {
        let (input_tx, input_rx) = mpsc::channel(PORT_DEPTH);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self { rx: input_rx },
            close_tx,
            PortsHandle {
                id: id.to_string(),
                input_tx: Some(input_tx),
                output_rx: None,
                close_rx: Some(close_rx),
            },
        )
    }
}

/// Output-only ports.
pub struct ProducerPorts {
    tx: mpsc::Sender<WorkerFrame>,
}

impl ProducerPorts {
    pub async fn try_send(&self, frame: WorkerFrame) -> Result<(), SendError<WorkerFrame>> {
        self.tx.send(frame).await
    }

    pub async fn send(&self, frame: WorkerFrame) {
        if let Err(e) = self.tx.send(frame).await {
            warn!("Send error: {:?}", e)
        }
    }
}

impl Ports for ProducerPorts {
    fn create(id: &str) -> (Self, oneshot::Sender<CloseReason>, PortsHandle) {
        let (output_tx, output_rx) = mpsc::channel(PORT_DEPTH);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self { tx: output_tx },
            close_tx,
            PortsHandle {
                id: id.to_string(),
                input_tx: None,
                output_rx: Some(output_rx),
                close_rx: Some(close_rx),
            },
        )
    }
}

/// Bidirectional ports.
pub struct PipelinePorts {
    rx: mpsc::Receiver<WorkerFrame>,
    tx: mpsc::Sender<WorkerFrame>,
}

impl PipelinePorts {
    pub async fn recv(&mut self) -> Option<WorkerFrame> {
        self.rx.recv().await
    }

    pub async fn send(&self, frame: WorkerFrame) {
        if let Err(e) = self.tx.send(frame).await {
            warn!("Send error: {:?}", e)
        }
    }

    /// A sending half usable while `recv` is pending.
    pub fn clone_as_producer(&self) -> ProducerPorts {
        ProducerPorts {
            tx: self.tx.clone(),
        }
    }
}

impl Ports for PipelinePorts {
    fn create(id: &str) -> (Self, oneshot::Sender<CloseReason>, PortsHandle) {
        let (input_tx, input_rx) = mpsc::channel(PORT_DEPTH);
        let (output_tx, output_rx) = mpsc::channel(PORT_DEPTH);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self {
                rx: input_rx,
                tx: output_tx,
            },
            close_tx,
            PortsHandle {
                id: id.to_string(),
                input_tx: Some(input_tx),
                output_rx: Some(output_rx),
                close_rx: Some(close_rx),
            },
        )
    }
}

#[async_trait]
pub trait Component<P, C>
where
    P: Ports + 'static,
    C: Send + 'static,
{
    fn name() -> &'static str;

    fn start(&self, id: &str, context: C) -> PortsHandle {
        info!("Starting component: {}", Self::name());
        let env = ComponentEnv::new(id, Self::name());
        let (ports, close_tx, handle) = P::create(id);
        tokio::spawn(async move {
            let reason = Self::run(ports, context, env).await;
            if close_tx.send(reason).is_err() {
                warn!("Failed to send close reason: receiver dropped");
            }
        });
        handle
    }

    async fn run(ports: P, context: C, env: ComponentEnv) -> CloseReason;
}
