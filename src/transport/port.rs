//! Message ports between the controller and a worker.
//!
//! # Example
//!
//! ```ignore
//! let (port, endpoint) = WorkerPort::pair();
//! std::thread::spawn(move || {
//!     while let Some(message) = endpoint.recv_blocking() {
//!         endpoint.post(message);
//!     }
//! });
//! let channel = MessageChannel::open(port);
//! ```

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Something a worker reports to its controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A serialized reply envelope.
    Message(Bytes),
    /// The worker hit an unhandled fault and is going away.
    Error(String),
}

/// Controller side of a worker connection.
///
/// Dropping the port (or its outbound half) closes the worker's inbox,
/// which terminates the worker.
pub struct WorkerPort {
    pub(crate) outbound: mpsc::UnboundedSender<Bytes>,
    pub(crate) inbound: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Worker side of a connection.
pub struct WorkerEndpoint {
    inbox: mpsc::UnboundedReceiver<Bytes>,
    outbox: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerPort {
    /// Create a connected port/endpoint pair.
    pub fn pair() -> (WorkerPort, WorkerEndpoint) {
        let (outbound, inbox) = mpsc::unbounded_channel();
        let (outbox, inbound) = mpsc::unbounded_channel();

        (
            WorkerPort { outbound, inbound },
            WorkerEndpoint { inbox, outbox },
        )
    }
}

impl WorkerEndpoint {
    /// Wait for the next message from a non-async thread.
    ///
    /// Returns `None` once the controller has terminated the worker.
    pub fn recv_blocking(&mut self) -> Option<Bytes> {
        self.inbox.blocking_recv()
    }

    /// Wait for the next message from async code.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbox.recv().await
    }

    /// Post a reply. Returns `false` if the controller is gone.
    pub fn post(&self, message: impl Into<Bytes>) -> bool {
        self.outbox.send(WorkerEvent::Message(message.into())).is_ok()
    }

    /// Report an unhandled fault.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.outbox.send(WorkerEvent::Error(reason.into()));
    }

    /// Whether the controller has terminated this worker.
    pub fn is_terminated(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// Creates isolated decode workers.
///
/// An `Err` from [`spawn`](WorkerSpawner::spawn) means isolated execution is
/// unavailable; the decoder then falls back to main-thread decoding.
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Start one worker and return the controller's port to it.
    fn spawn(&self) -> Result<WorkerPort>;
}

impl<F> WorkerSpawner for F
where
    F: Fn() -> Result<WorkerPort> + Send + Sync + 'static,
{
    fn spawn(&self) -> Result<WorkerPort> {
        self()
    }
}
