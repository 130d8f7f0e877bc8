//! Frame capture: the region cropped from each video frame and the loop
//! feeding frames to the [`Decoder`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::decoder::Decoder;
use crate::pixels::{DecodeFault, DecodedResult, PixelBuffer, BYTES_PER_PIXEL};

/// Callback receiving decoded results.
pub type DecodeCallback = Arc<dyn Fn(DecodedResult) + Send + Sync>;

/// Frame source shared between successive capture runs.
pub type SharedSource = Arc<Mutex<dyn FrameSource>>;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Size of `width` x `height` pixels.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Rectangle cut out of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// Region of at most `capture` centered in `video`.
    pub fn centered(video: Size, capture: Size) -> Self {
        Self {
            dx: video.width.saturating_sub(capture.width) / 2,
            dy: video.height.saturating_sub(capture.height) / 2,
            width: capture.width.min(video.width),
            height: capture.height.min(video.height),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl PixelBuffer {
    /// Copy `region` out of this frame.
    pub fn crop(&self, region: CaptureRegion) -> Result<PixelBuffer, DecodeFault> {
        self.validate()?;

        let fits = region.dx.checked_add(region.width).is_some_and(|r| r <= self.width)
            && region.dy.checked_add(region.height).is_some_and(|b| b <= self.height);
        if !fits {
            return Err(DecodeFault::Failed(format!(
                "region {}x{}+{}+{} outside {}x{} frame",
                region.width, region.height, region.dx, region.dy, self.width, self.height
            )));
        }

        let stride = self.width as usize * BYTES_PER_PIXEL;
        let row_len = region.width as usize * BYTES_PER_PIXEL;
        let mut out = BytesMut::with_capacity(row_len * region.height as usize);
        for y in region.dy..region.dy + region.height {
            let start = y as usize * stride + region.dx as usize * BYTES_PER_PIXEL;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }

        Ok(PixelBuffer::new(out.freeze(), region.width, region.height))
    }
}

/// Produces frames on demand.
pub trait FrameSource: Send + 'static {
    /// The current frame, or `None` while the surface has no dimensions.
    fn capture(&mut self) -> Option<PixelBuffer>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<PixelBuffer> + Send + 'static,
{
    fn capture(&mut self) -> Option<PixelBuffer> {
        self()
    }
}

/// Crops the centered capture region out of every frame of `inner`.
pub struct CenteredCrop<S> {
    inner: S,
    capture: Size,
}

impl<S: FrameSource> CenteredCrop<S> {
    pub fn new(inner: S, capture: Size) -> Self {
        Self { inner, capture }
    }
}

impl<S: FrameSource> FrameSource for CenteredCrop<S> {
    fn capture(&mut self) -> Option<PixelBuffer> {
        let frame = self.inner.capture()?;
        let video = Size::new(frame.width, frame.height);
        if video.is_empty() {
            return None;
        }

        match frame.crop(CaptureRegion::centered(video, self.capture)) {
            Ok(cropped) => Some(cropped),
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                None
            }
        }
    }
}

/// Start/stop handle over the capture task.
///
/// Each tick grabs one frame, awaits its decode, and hands non-empty
/// results to the callback. `stop` is cooperative: the task notices at its
/// next tick, and a decode finishing after `stop` is not delivered.
pub struct CaptureLoop {
    source: SharedSource,
    decoder: Arc<Decoder>,
    interval: Duration,
    on_decode: DecodeCallback,
    run: Mutex<Option<Run>>,
}

struct Run {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl CaptureLoop {
    /// Create a stopped loop feeding frames from `source` to `decoder`
    /// every `interval`.
    pub fn new(
        source: SharedSource,
        decoder: Arc<Decoder>,
        interval: Duration,
        on_decode: DecodeCallback,
    ) -> Self {
        Self {
            source,
            decoder,
            interval,
            on_decode,
            run: Mutex::new(None),
        }
    }

    /// Spawn the capture task. No-op while running.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut run = self.lock();
        if run.as_ref().is_some_and(|r| r.running.load(Ordering::Acquire)) {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(capture_task(
            self.source.clone(),
            self.decoder.clone(),
            self.interval,
            self.on_decode.clone(),
            running.clone(),
        ));
        tracing::debug!("Capture loop started ({:?} interval)", self.interval);

        *run = Some(Run { running, task });
    }

    /// Ask the task to stop. Idempotent.
    pub fn stop(&self) {
        if let Some(run) = self.lock().take() {
            run.running.store(false, Ordering::Release);
            tracing::debug!("Capture loop stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| r.running.load(Ordering::Acquire) && !r.task.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn capture_task(
    source: SharedSource,
    decoder: Arc<Decoder>,
    interval: Duration,
    on_decode: DecodeCallback,
    running: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !running.load(Ordering::Acquire) {
            break;
        }

        let frame = source.lock().unwrap_or_else(|e| e.into_inner()).capture();
        let Some(frame) = frame else { continue };

        if let Some(result) = decoder.decode(&frame).await {
            if !running.load(Ordering::Acquire) {
                tracing::debug!("Discarding result decoded after stop");
                break;
            }
            on_decode(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::StaticFallback;

    #[test]
    fn test_centered_region_in_larger_video() {
        let region = CaptureRegion::centered(Size::new(1920, 1080), Size::new(1280, 720));
        assert_eq!(
            region,
            CaptureRegion {
                dx: 320,
                dy: 180,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_centered_region_clamps_to_small_video() {
        let region = CaptureRegion::centered(Size::new(640, 480), Size::new(1280, 720));
        assert_eq!(
            region,
            CaptureRegion {
                dx: 0,
                dy: 0,
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn test_crop_copies_rows() {
        // 3x3 frame, luma = index
        let frame = PixelBuffer::from_luma(&[0, 1, 2, 3, 4, 5, 6, 7, 8], 3, 3);
        let region = CaptureRegion {
            dx: 1,
            dy: 1,
            width: 2,
            height: 2,
        };

        let cropped = frame.crop(region).unwrap();
        assert_eq!(cropped, PixelBuffer::from_luma(&[4, 5, 7, 8], 2, 2));
    }

    #[test]
    fn test_crop_rejects_region_outside_frame() {
        let frame = PixelBuffer::filled(0, 4, 4);
        let region = CaptureRegion {
            dx: 2,
            dy: 0,
            width: 4,
            height: 4,
        };
        assert!(matches!(frame.crop(region), Err(DecodeFault::Failed(_))));
    }

    #[test]
    fn test_centered_crop_skips_empty_surface() {
        let mut frames = vec![
            PixelBuffer::filled(9, 8, 6),
            PixelBuffer::new(Vec::new(), 0, 0),
        ];
        let mut source = CenteredCrop::new(move || frames.pop(), Size::new(4, 4));

        assert_eq!(source.capture(), None);
        let frame = source.capture().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
    }

    fn width_decoder(frame: &PixelBuffer) -> Result<Option<DecodedResult>, DecodeFault> {
        if frame.width == 0 {
            return Ok(None);
        }
        Ok(Some(DecodedResult::text(frame.width.to_string())))
    }

    async fn main_thread_decoder() -> Arc<Decoder> {
        let decoder = Decoder::builder()
            .fallback(StaticFallback::new(width_decoder))
            .build();
        decoder.initialize().await;
        Arc::new(decoder)
    }

    #[tokio::test]
    async fn test_loop_delivers_only_found_results() {
        let mut widths = vec![0u32, 7, 0, 5].into_iter();
        let source = move || widths.next().map(|w| PixelBuffer::filled(1, w, 1));
        let source: SharedSource = Arc::new(Mutex::new(source));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_decode: DecodeCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });

        let capture = CaptureLoop::new(
            source,
            main_thread_decoder().await,
            Duration::from_millis(1),
            on_decode,
        );
        capture.start();

        assert_eq!(rx.recv().await, Some(DecodedResult::text("7")));
        assert_eq!(rx.recv().await, Some(DecodedResult::text("5")));
        capture.stop();
    }

    #[tokio::test]
    async fn test_stop_halts_delivery_and_restart_resumes() {
        let source: SharedSource = Arc::new(Mutex::new(|| Some(PixelBuffer::filled(1, 3, 1))));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_decode: DecodeCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });

        let capture = CaptureLoop::new(
            source,
            main_thread_decoder().await,
            Duration::from_millis(2),
            on_decode,
        );
        capture.start();
        capture.start();
        assert!(rx.recv().await.is_some());

        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        capture.start();
        assert!(capture.is_running());
        assert_eq!(rx.recv().await, Some(DecodedResult::text("3")));
    }
}
