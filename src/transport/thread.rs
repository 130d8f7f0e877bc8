//! Thread-backed workers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use super::{WorkerEndpoint, WorkerPort, WorkerSpawner};
use crate::codec::MsgPackCodec;
use crate::error::{Result, ScannerError};
use crate::handler::{DecodeBackend, FaultPolicy};
use crate::pixels::{panic_message, PixelDecoder};
use crate::protocol::{Envelope, Request};

/// Spawns each decode worker on a dedicated OS thread.
///
/// The thread shares nothing with the controller: requests and replies
/// cross as MsgPack bytes.
pub struct ThreadSpawner {
    backend: DecodeBackend,
    spawned: AtomicU64,
}

impl ThreadSpawner {
    /// Spawner whose workers decode with `decoder`.
    pub fn new(decoder: Arc<dyn PixelDecoder>, policy: FaultPolicy) -> Self {
        Self {
            backend: DecodeBackend::new(decoder, policy),
            spawned: AtomicU64::new(0),
        }
    }

    /// Spawner using the bundled rqrr decoder.
    #[cfg(feature = "grid-decoder")]
    pub fn with_grid_decoder(policy: FaultPolicy) -> Self {
        Self::new(Arc::new(crate::pixels::GridDecoder::new()), policy)
    }

    /// Number of workers started so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Acquire)
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self) -> Result<WorkerPort> {
        let (port, endpoint) = WorkerPort::pair();
        let backend = self.backend.clone();
        let n = self.spawned.fetch_add(1, Ordering::AcqRel);

        std::thread::Builder::new()
            .name(format!("qrscan-worker-{}", n))
            .spawn(move || run_worker(backend, endpoint))
            .map_err(|e| ScannerError::WorkerUnavailable(e.to_string()))?;

        Ok(port)
    }
}

/// Worker main loop: one handler call per inbound message, in order.
///
/// Exits when the controller closes the inbox or after reporting an
/// unhandled fault.
pub(crate) fn run_worker(backend: DecodeBackend, mut endpoint: WorkerEndpoint) {
    tracing::debug!("Decode worker started");

    while let Some(message) = endpoint.recv_blocking() {
        let envelope: Envelope<Request> = match MsgPackCodec::decode(&message) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Worker ignoring malformed message: {}", e);
                continue;
            }
        };

        let reply = match catch_unwind(AssertUnwindSafe(|| backend.handle(envelope))) {
            Ok(Ok(reply)) => reply,
            Ok(Err(fault)) => {
                endpoint.fail(fault.to_string());
                break;
            }
            Err(panic) => {
                endpoint.fail(panic_message(panic.as_ref()));
                break;
            }
        };

        match MsgPackCodec::encode(&reply) {
            Ok(bytes) => {
                if !endpoint.post(Bytes::from(bytes)) {
                    break;
                }
            }
            Err(e) => tracing::warn!("Worker failed to encode reply {}: {}", reply.id, e),
        }
    }

    tracing::debug!("Decode worker stopped");
}
