//! Decoder facade: one `decode` entry point over whichever backend is live.
//!
//! ```text
//! Pending ──ack──► Worker
//!    │
//!    └─timeout/no worker──► Fallback ──loaded──► MainThread
//!                               │
//!                               └─load failed──► Failed
//! ```
//!
//! `decode` never blocks on initialization and never returns an error:
//! while no backend is operational it resolves to `None`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{DEFAULT_DECODE_TIMEOUT, DEFAULT_WORKER_ACK_TIMEOUT};
use crate::error::{Result, ScannerError};
use crate::lifecycle::{BackendState, WorkerLifecycle};
use crate::pixels::{decode_contained, DecodedResult, PixelBuffer, PixelDecoder};
use crate::transport::WorkerSpawner;

/// Boxed future, as returned by loaders.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback fired once when a backend becomes operational.
pub type LoadCallback = Arc<dyn Fn(DecoderMode) + Send + Sync>;

/// Which backend services decode calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderMode {
    /// Not initialized yet, or torn down.
    Pending,
    /// Decoding on the isolated worker.
    Worker,
    /// Worker unavailable, loading the main-thread decoder.
    Fallback,
    /// Decoding inline on the caller's task.
    MainThread,
    /// No backend could be set up.
    Failed,
}

impl DecoderMode {
    /// Wire name (`"main-thread"`, etc.).
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderMode::Pending => "pending",
            DecoderMode::Worker => "worker",
            DecoderMode::Fallback => "fallback",
            DecoderMode::MainThread => "main-thread",
            DecoderMode::Failed => "failed",
        }
    }

    /// Whether decode calls reach a real decoder in this mode.
    pub fn is_operational(&self) -> bool {
        matches!(self, DecoderMode::Worker | DecoderMode::MainThread)
    }
}

impl std::fmt::Display for DecoderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provides the main-thread decoder, possibly asynchronously.
pub trait FallbackLoader: Send + Sync + 'static {
    /// Load the decoder.
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PixelDecoder>>>;
}

impl<F> FallbackLoader for F
where
    F: Fn() -> BoxFuture<'static, Result<Arc<dyn PixelDecoder>>> + Send + Sync + 'static,
{
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PixelDecoder>>> {
        self()
    }
}

/// Loader for a decoder that is already in memory.
#[derive(Clone)]
pub struct StaticFallback(Arc<dyn PixelDecoder>);

impl StaticFallback {
    /// Loader handing out `decoder` as is.
    pub fn new(decoder: impl PixelDecoder) -> Self {
        Self(Arc::new(decoder))
    }
}

impl FallbackLoader for StaticFallback {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PixelDecoder>>> {
        let decoder = self.0.clone();
        Box::pin(async move { Ok(decoder) })
    }
}

/// Loader that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl FallbackLoader for NoFallback {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PixelDecoder>>> {
        Box::pin(async {
            Err(ScannerError::FallbackUnavailable(
                "no main-thread decoder configured".to_string(),
            ))
        })
    }
}

/// The live backend, one variant per decoding capability.
#[derive(Clone)]
enum Backend {
    Unready,
    Worker(Arc<WorkerLifecycle>),
    MainThread(Arc<dyn PixelDecoder>),
    Failed,
}

struct State {
    backend: Backend,
    /// Bumped on teardown so a late initialization knows it is stale.
    epoch: u64,
    initializing: bool,
    /// Worker still in its ack handshake; shut down by teardown.
    starting: Option<Arc<WorkerLifecycle>>,
}

/// Builder for [`Decoder`].
pub struct DecoderBuilder {
    spawner: Option<Arc<dyn WorkerSpawner>>,
    fallback: Arc<dyn FallbackLoader>,
    ack_timeout: Duration,
    decode_timeout: Duration,
    on_load: Option<LoadCallback>,
}

impl DecoderBuilder {
    fn new() -> Self {
        Self {
            spawner: None,
            fallback: Arc::new(NoFallback),
            ack_timeout: DEFAULT_WORKER_ACK_TIMEOUT,
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            on_load: None,
        }
    }

    /// Worker spawner. Without one, isolated execution counts as
    /// unsupported and initialization goes straight to the fallback.
    pub fn spawner(mut self, spawner: impl WorkerSpawner) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Shared worker spawner.
    pub fn shared_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Main-thread decoder loader.
    pub fn fallback(mut self, loader: impl FallbackLoader) -> Self {
        self.fallback = Arc::new(loader);
        self
    }

    /// Shared main-thread decoder loader.
    pub fn shared_fallback(mut self, loader: Arc<dyn FallbackLoader>) -> Self {
        self.fallback = loader;
        self
    }

    /// How long to wait for the worker's ack.
    ///
    /// Default: 3 seconds
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Upper bound for one worker decode; zero waits indefinitely.
    ///
    /// Default: zero
    pub fn decode_timeout(mut self, timeout: Duration) -> Self {
        self.decode_timeout = timeout;
        self
    }

    /// Callback for the first operational mode.
    pub fn on_load<F>(mut self, callback: F) -> Self
    where
        F: Fn(DecoderMode) + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(callback));
        self
    }

    /// Create the decoder in `Pending` mode. Nothing starts until
    /// [`Decoder::initialize`].
    pub fn build(self) -> Decoder {
        let (mode, _) = watch::channel(DecoderMode::Pending);
        Decoder {
            spawner: self.spawner,
            fallback: self.fallback,
            ack_timeout: self.ack_timeout,
            decode_timeout: self.decode_timeout,
            on_load: self.on_load,
            state: Mutex::new(State {
                backend: Backend::Unready,
                epoch: 0,
                initializing: false,
                starting: None,
            }),
            mode,
            loaded: AtomicBool::new(false),
        }
    }
}

/// Picks a backend and routes frames to it.
pub struct Decoder {
    spawner: Option<Arc<dyn WorkerSpawner>>,
    fallback: Arc<dyn FallbackLoader>,
    ack_timeout: Duration,
    decode_timeout: Duration,
    on_load: Option<LoadCallback>,
    state: Mutex<State>,
    mode: watch::Sender<DecoderMode>,
    loaded: AtomicBool,
}

impl Decoder {
    /// Create a builder with default timeouts and no backends.
    pub fn builder() -> DecoderBuilder {
        DecoderBuilder::new()
    }

    /// Current mode.
    pub fn mode(&self) -> DecoderMode {
        *self.mode.borrow()
    }

    /// Watch mode changes.
    pub fn subscribe(&self) -> watch::Receiver<DecoderMode> {
        self.mode.subscribe()
    }

    /// State of the worker, if the worker backend is active.
    pub fn worker_state(&self) -> Option<BackendState> {
        match &self.lock().backend {
            Backend::Worker(lifecycle) => Some(lifecycle.state()),
            _ => None,
        }
    }

    /// Workers replaced after crashes, if the worker backend is active.
    pub fn worker_restarts(&self) -> Option<u64> {
        match &self.lock().backend {
            Backend::Worker(lifecycle) => Some(lifecycle.restarts()),
            _ => None,
        }
    }

    /// Run the startup state machine and return the mode it settled in.
    ///
    /// Does nothing if a backend is already set up or another
    /// initialization is running. If [`teardown`](Self::teardown) happens
    /// meanwhile, the result is discarded and the mode stays `Pending`.
    pub async fn initialize(&self) -> DecoderMode {
        let epoch = {
            let mut state = self.lock();
            if state.initializing || !matches!(state.backend, Backend::Unready) {
                return self.mode();
            }
            state.initializing = true;
            state.epoch
        };

        match self.start_worker(epoch).await {
            Ok(lifecycle) => {
                if !self.install(epoch, Backend::Worker(lifecycle.clone()), DecoderMode::Worker) {
                    lifecycle.shutdown();
                }
                return self.mode();
            }
            Err(_) if self.lock().epoch != epoch => {
                tracing::debug!("Initialization cancelled by teardown");
                return self.mode();
            }
            Err(e) => tracing::warn!(
                "Decode worker unavailable ({}), setting up main-thread decoding",
                e
            ),
        }

        if !self.install(epoch, Backend::Unready, DecoderMode::Fallback) {
            return self.mode();
        }

        match self.fallback.load().await {
            Ok(decoder) => {
                self.install(epoch, Backend::MainThread(decoder), DecoderMode::MainThread);
            }
            Err(e) => {
                tracing::error!("Failed to load main-thread decoder: {}", e);
                self.install(epoch, Backend::Failed, DecoderMode::Failed);
            }
        }

        self.mode()
    }

    /// Decode one frame with the active backend.
    ///
    /// Resolves to `None` when nothing was found, when the frame was lost
    /// to a fault or crash, or when no backend is operational.
    pub async fn decode(&self, frame: &PixelBuffer) -> Option<DecodedResult> {
        let backend = self.lock().backend.clone();

        match backend {
            Backend::Worker(lifecycle) => match lifecycle.decode(frame.clone()).await {
                Ok(outcome) => {
                    if outcome.is_fault() {
                        tracing::debug!("Worker could not decode frame");
                    }
                    outcome.into_result()
                }
                Err(e) => {
                    tracing::debug!("Frame dropped: {}", e);
                    None
                }
            },
            Backend::MainThread(decoder) => match decode_contained(decoder.as_ref(), frame) {
                Ok(result) => result,
                Err(fault) => {
                    tracing::warn!("Main-thread decode failed: {}", fault);
                    None
                }
            },
            Backend::Unready | Backend::Failed => None,
        }
    }

    /// Terminate the worker and reset to `Pending`. Idempotent.
    pub fn teardown(&self) {
        let (previous, starting) = {
            let mut state = self.lock();
            state.epoch += 1;
            state.initializing = false;
            let starting = state.starting.take();
            (std::mem::replace(&mut state.backend, Backend::Unready), starting)
        };

        if let Backend::Worker(lifecycle) = previous {
            lifecycle.shutdown();
        }
        if let Some(lifecycle) = starting {
            lifecycle.shutdown();
        }

        self.mode.send_replace(DecoderMode::Pending);
    }

    /// Spawn a worker and wait for its ack. The worker is parked in
    /// `State::starting` meanwhile so a teardown can stop it.
    async fn start_worker(&self, epoch: u64) -> Result<Arc<WorkerLifecycle>> {
        let spawner = self.spawner.clone().ok_or_else(|| {
            ScannerError::WorkerUnavailable("isolated execution not supported".to_string())
        })?;

        let lifecycle = Arc::new(WorkerLifecycle::start(spawner, self.decode_timeout)?);
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                drop(state);
                lifecycle.shutdown();
                return Err(ScannerError::Terminated);
            }
            state.starting = Some(lifecycle.clone());
        }

        let acked = lifecycle.acknowledge(self.ack_timeout).await;
        {
            let mut state = self.lock();
            if state.epoch == epoch {
                state.starting = None;
            }
        }

        if let Err(e) = acked {
            lifecycle.shutdown();
            return Err(e);
        }
        Ok(lifecycle)
    }

    /// Apply a transition unless a teardown happened since `epoch`.
    fn install(&self, epoch: u64, backend: Backend, mode: DecoderMode) -> bool {
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                tracing::debug!("Discarding stale transition to {}", mode);
                return false;
            }
            state.backend = backend;
            if mode != DecoderMode::Fallback {
                state.initializing = false;
            }
            self.mode.send_replace(mode);
        }

        tracing::info!("Decoder mode: {}", mode);
        if mode.is_operational() && !self.loaded.swap(true, Ordering::AcqRel) {
            if let Some(callback) = &self.on_load {
                callback(mode);
            }
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        let state = self.lock();
        if let Backend::Worker(lifecycle) = &state.backend {
            lifecycle.shutdown();
        }
        if let Some(lifecycle) = &state.starting {
            lifecycle.shutdown();
        }
    }
}
