/// Frames exchanged between components over the event bus.
#[derive(Debug, Clone)]
pub enum WorkerFrame {
    /// The reconciler applied inbound transactions.
    InboundApplied { count: usize },
    /// A withdrawal was queued; the submitter should drain early.
    WithdrawQueued,
    Shutdown,
}

impl std::fmt::Display for WorkerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerFrame::InboundApplied { count } => {
                write!(f, "InboundApplied({count})")
            }
            WorkerFrame::WithdrawQueued => write!(f, "WithdrawQueued"),
            WorkerFrame::Shutdown => write!(f, "Shutdown"),
        }
    }
}
