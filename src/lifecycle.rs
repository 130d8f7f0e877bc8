//! Worker lifecycle: startup, liveness handshake, crash recovery, shutdown.
//!
//! [`WorkerLifecycle`] owns at most one live [`BackendHandle`]. A handle
//! whose channel has faulted is replaced on the next request, so a crashed
//! worker costs the frames that were in flight and nothing more.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::channel::{ChannelStatus, MessageChannel};
use crate::error::{Result, ScannerError};
use crate::pixels::PixelBuffer;
use crate::protocol::{DecodeOutcome, Request, Response};
use crate::transport::WorkerSpawner;

/// State of one running worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Spawned, no reply seen yet.
    Starting,
    /// Has answered at least one request.
    Ready,
    /// Reported an error or died; will be replaced.
    Faulted,
    /// Shut down by the controller.
    Terminated,
}

/// One running worker plus its channel.
pub struct BackendHandle {
    generation: u64,
    channel: MessageChannel,
    answered: AtomicBool,
}

impl BackendHandle {
    fn start(spawner: &dyn WorkerSpawner, generation: u64) -> Result<Self> {
        let port = spawner.spawn()?;
        Ok(Self {
            generation,
            channel: MessageChannel::open(port),
            answered: AtomicBool::new(false),
        })
    }

    /// Spawn counter value of this handle (0 for the first worker).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current state.
    pub fn state(&self) -> BackendState {
        match self.channel.status() {
            ChannelStatus::Faulted => BackendState::Faulted,
            ChannelStatus::Closed => BackendState::Terminated,
            ChannelStatus::Open if self.answered.load(Ordering::Acquire) => BackendState::Ready,
            ChannelStatus::Open => BackendState::Starting,
        }
    }

    async fn send(&self, content: Request, timeout: Duration) -> Result<Response> {
        let response = self.channel.send(content, timeout).await?;
        self.answered.store(true, Ordering::Release);
        Ok(response)
    }

    fn terminate(&self) {
        self.channel.close();
    }
}

/// Starts, supervises and replaces decode workers.
pub struct WorkerLifecycle {
    spawner: Arc<dyn WorkerSpawner>,
    current: Mutex<Option<Arc<BackendHandle>>>,
    generations: AtomicU64,
    decode_timeout: Duration,
}

impl WorkerLifecycle {
    /// Spawn the first worker.
    ///
    /// Fails when isolated execution is unavailable.
    pub fn start(spawner: Arc<dyn WorkerSpawner>, decode_timeout: Duration) -> Result<Self> {
        let handle = BackendHandle::start(spawner.as_ref(), 0)?;
        tracing::debug!("Decode worker 0 spawned");

        Ok(Self {
            spawner,
            current: Mutex::new(Some(Arc::new(handle))),
            generations: AtomicU64::new(1),
            decode_timeout,
        })
    }

    /// Liveness probe: succeeds once the worker echoes an `ack`.
    pub async fn acknowledge(&self, timeout: Duration) -> Result<()> {
        let handle = self.handle()?;
        match handle.send(Request::Ack, timeout).await? {
            Response::Ack => Ok(()),
            other => Err(ScannerError::Protocol(format!(
                "expected ack reply, got {:?}",
                other
            ))),
        }
    }

    /// Decode a frame on the worker.
    pub async fn decode(&self, frame: PixelBuffer) -> Result<DecodeOutcome> {
        let handle = self.handle()?;
        match handle.send(Request::Decode(frame), self.decode_timeout).await? {
            Response::Decode(outcome) => Ok(outcome),
            other => Err(ScannerError::Protocol(format!(
                "expected decode reply, got {:?}",
                other
            ))),
        }
    }

    /// State of the current worker, `Terminated` after shutdown.
    pub fn state(&self) -> BackendState {
        self.lock()
            .as_ref()
            .map(|h| h.state())
            .unwrap_or(BackendState::Terminated)
    }

    /// Number of workers replaced after a fault.
    pub fn restarts(&self) -> u64 {
        self.generations.load(Ordering::Acquire).saturating_sub(1)
    }

    /// Terminate the worker. Later requests fail with `Terminated` and no
    /// replacement is spawned. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock().take() {
            handle.terminate();
            tracing::debug!("Decode worker {} terminated", handle.generation());
        }
    }

    /// The live handle, replacing a faulted one first.
    ///
    /// If the replacement cannot be spawned the faulted handle stays in
    /// place, so the next request tries again.
    fn handle(&self) -> Result<Arc<BackendHandle>> {
        let mut current = self.lock();
        let handle = current.as_ref().ok_or(ScannerError::Terminated)?;

        if handle.state() != BackendState::Faulted {
            return Ok(handle.clone());
        }

        let generation = self.generations.load(Ordering::Acquire);
        let replacement = match BackendHandle::start(self.spawner.as_ref(), generation) {
            Ok(h) => Arc::new(h),
            Err(e) => {
                tracing::warn!(
                    "Decode worker {} faulted and could not be replaced: {}",
                    handle.generation(),
                    e
                );
                return Err(e);
            }
        };
        self.generations.fetch_add(1, Ordering::AcqRel);
        tracing::info!(
            "Decode worker {} faulted, started worker {}",
            handle.generation(),
            generation
        );

        if let Some(faulted) = current.replace(replacement.clone()) {
            faulted.terminate();
        }
        Ok(replacement)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<BackendHandle>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkerLifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
