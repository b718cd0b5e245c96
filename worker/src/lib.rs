pub mod common;
pub mod event_bus;
pub mod frame;
pub mod reconciler;
pub mod submitter;
pub mod sweeper;

pub use common::{CloseReason, Component, ComponentEnv, PortsHandle};
pub use event_bus::EventBus;
pub use frame::WorkerFrame;
pub use reconciler::Reconciler;
pub use submitter::Submitter;
pub use sweeper::Sweeper;
