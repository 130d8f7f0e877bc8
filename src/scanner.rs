//! Scanner: decoder, capture loop and camera stream wired together.
//!
//! ```ignore
//! use qrscan::{setup_scanner, ScannerConfig};
//!
//! let scanner = setup_scanner(ScannerConfig::default())
//!     .on_decode(|result| println!("{}", result.data))
//!     .on_scanner_load(|mode| println!("decoding on {}", mode))
//!     .start(frames);
//!
//! // ...
//! scanner.stop();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::{CaptureLoop, CenteredCrop, DecodeCallback, FrameSource, SharedSource};
use crate::config::ScannerConfig;
use crate::decoder::{Decoder, DecoderMode, FallbackLoader, LoadCallback};
use crate::media::{MediaSource, StreamId, StreamRegistry};
use crate::pixels::DecodedResult;
use crate::transport::WorkerSpawner;

/// Builder pre-loaded with `config`.
pub fn setup_scanner(config: ScannerConfig) -> ScannerBuilder {
    ScannerBuilder::new(config)
}

/// Builder for [`Scanner`].
///
/// With the `grid-decoder` feature, an unset spawner defaults to a
/// thread worker running the bundled decoder, and an unset fallback to the
/// same decoder on the main thread.
pub struct ScannerBuilder {
    config: ScannerConfig,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    fallback: Option<Arc<dyn FallbackLoader>>,
    media: Option<Arc<StreamRegistry>>,
    on_decode: Option<DecodeCallback>,
    on_scanner_load: Option<LoadCallback>,
}

impl ScannerBuilder {
    /// Builder with `config` and default backends.
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            spawner: None,
            fallback: None,
            media: None,
            on_decode: None,
            on_scanner_load: None,
        }
    }

    /// Override `workerAckTimeout`.
    pub fn worker_ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.worker_ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Worker spawner.
    pub fn spawner(mut self, spawner: impl WorkerSpawner) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Main-thread decoder loader.
    pub fn fallback(mut self, loader: impl FallbackLoader) -> Self {
        self.fallback = Some(Arc::new(loader));
        self
    }

    /// Camera to open with the configured constraints while scanning.
    pub fn media(mut self, source: impl MediaSource) -> Self {
        self.media = Some(Arc::new(StreamRegistry::new(source)));
        self
    }

    /// Called with every decoded result.
    pub fn on_decode<F>(mut self, callback: F) -> Self
    where
        F: Fn(DecodedResult) + Send + Sync + 'static,
    {
        self.on_decode = Some(Arc::new(callback));
        self
    }

    /// Called once, when decoding first becomes operational.
    pub fn on_scanner_load<F>(mut self, callback: F) -> Self
    where
        F: Fn(DecoderMode) + Send + Sync + 'static,
    {
        self.on_scanner_load = Some(Arc::new(callback));
        self
    }

    /// Start scanning frames from `source`.
    ///
    /// Capture begins at once; decoder initialization runs in the
    /// background and frames seen before it settles decode to nothing.
    /// Watch [`Decoder::subscribe`] or `on_scanner_load` to learn when it
    /// does. Must be called within a tokio runtime.
    pub fn start(self, source: impl FrameSource) -> Scanner {
        let config = self.config;

        let mut decoder = Decoder::builder()
            .ack_timeout(config.worker_ack_timeout())
            .decode_timeout(config.decode_timeout());
        if let Some(spawner) = self.spawner.or_else(|| default_spawner(&config)) {
            decoder = decoder.shared_spawner(spawner);
        }
        decoder = decoder.shared_fallback(self.fallback.unwrap_or_else(default_fallback));
        if let Some(callback) = self.on_scanner_load {
            decoder = decoder.on_load(move |mode| callback(mode));
        }
        let decoder = Arc::new(decoder.build());

        let init = decoder.clone();
        tokio::spawn(async move {
            let mode = init.initialize().await;
            tracing::debug!("Decoder initialization finished in {} mode", mode);
        });

        let stream = self.media.map(|registry| {
            let ticket = registry.open(config.constraints.clone());
            let id = ticket.id().clone();
            let opened = registry.clone();
            tokio::spawn(async move {
                if opened.acquire(&ticket).await.is_some() {
                    tracing::debug!("Camera stream {} live", ticket.id());
                }
            });
            (registry, id)
        });

        let source: SharedSource =
            Arc::new(Mutex::new(CenteredCrop::new(source, config.capture_size)));
        let on_decode = self
            .on_decode
            .unwrap_or_else(|| Arc::new(|_: DecodedResult| {}) as DecodeCallback);
        let capture = CaptureLoop::new(source, decoder.clone(), config.frame_interval(), on_decode);
        capture.start();

        Scanner {
            config,
            decoder,
            capture,
            stream,
            stopped: AtomicBool::new(false),
        }
    }
}

#[cfg(feature = "grid-decoder")]
fn default_spawner(config: &ScannerConfig) -> Option<Arc<dyn WorkerSpawner>> {
    Some(Arc::new(crate::transport::ThreadSpawner::with_grid_decoder(
        config.fault_policy,
    )))
}

#[cfg(not(feature = "grid-decoder"))]
fn default_spawner(_: &ScannerConfig) -> Option<Arc<dyn WorkerSpawner>> {
    None
}

#[cfg(feature = "grid-decoder")]
fn default_fallback() -> Arc<dyn FallbackLoader> {
    Arc::new(crate::decoder::StaticFallback::new(crate::pixels::GridDecoder::new()))
}

#[cfg(not(feature = "grid-decoder"))]
fn default_fallback() -> Arc<dyn FallbackLoader> {
    Arc::new(crate::decoder::NoFallback)
}

/// A running scanner. Dropping it stops everything.
pub struct Scanner {
    config: ScannerConfig,
    decoder: Arc<Decoder>,
    capture: CaptureLoop,
    stream: Option<(Arc<StreamRegistry>, StreamId)>,
    stopped: AtomicBool,
}

impl Scanner {
    /// Same as [`setup_scanner`].
    pub fn builder(config: ScannerConfig) -> ScannerBuilder {
        ScannerBuilder::new(config)
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Current decoder mode.
    pub fn mode(&self) -> DecoderMode {
        self.decoder.mode()
    }

    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.decoder
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    /// Stop capturing frames; the decoder stays up.
    pub fn pause(&self) {
        self.capture.stop();
    }

    /// Resume capturing after [`pause`](Self::pause). No-op once stopped.
    pub fn resume(&self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.capture.start();
        }
    }

    /// Stop capture, tear down the decoder and release the camera.
    /// Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.capture.stop();
        self.decoder.teardown();
        if let Some((registry, id)) = &self.stream {
            registry.close(id);
        }
        tracing::info!("Scanner stopped");
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}
