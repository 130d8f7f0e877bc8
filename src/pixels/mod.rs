//! Pixel buffers and the pixel-decode seam.
//!
//! A [`PixelBuffer`] is one captured frame: tightly packed RGBA bytes plus
//! its dimensions. A [`PixelDecoder`] turns a buffer into at most one
//! [`DecodedResult`]. The QR algorithm itself lives outside this crate; the
//! default [`GridDecoder`] delegates to `rqrr`.

#[cfg(feature = "grid-decoder")]
mod grid;

#[cfg(feature = "grid-decoder")]
pub use grid::GridDecoder;

use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Failure raised by a pixel decoder on a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFault {
    /// Buffer length does not match `width * height * 4`.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    /// Width or height is zero.
    #[error("empty frame ({width}x{height})")]
    Empty { width: u32, height: u32 },

    /// The decoder panicked.
    #[error("decoder panicked: {0}")]
    Panicked(String),

    /// Decoder-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// One captured video frame in RGBA layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    /// Packed RGBA bytes, row-major.
    pub data: Bytes,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelBuffer {
    /// Wrap RGBA bytes.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
        }
    }

    /// Build an opaque RGBA buffer from 8-bit luma samples.
    pub fn from_luma(luma: &[u8], width: u32, height: u32) -> Self {
        let mut data = Vec::with_capacity(luma.len() * BYTES_PER_PIXEL);
        for &l in luma {
            data.extend_from_slice(&[l, l, l, 0xFF]);
        }
        Self::new(data, width, height)
    }

    /// Frame filled with a single luma value.
    pub fn filled(luma: u8, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self::from_luma(&vec![luma; len], width, height)
    }

    /// Number of bytes the dimensions call for.
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Check dimensions against the buffer length.
    pub fn validate(&self) -> Result<(), DecodeFault> {
        if self.width == 0 || self.height == 0 {
            return Err(DecodeFault::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if self.data.len() != self.expected_len() {
            return Err(DecodeFault::Malformed {
                expected: self.expected_len(),
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Luma of the pixel at (x, y), ITU-R BT.601 weights.
    ///
    /// Callers must have validated the buffer.
    #[inline]
    pub fn luma(&self, x: usize, y: usize) -> u8 {
        let i = (y * self.width as usize + x) * BYTES_PER_PIXEL;
        let (r, g, b) = (
            self.data[i] as u32,
            self.data[i + 1] as u32,
            self.data[i + 2] as u32,
        );
        ((r * 299 + g * 587 + b * 114) / 1000) as u8
    }
}

/// A corner of a detected symbol, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Where a symbol was found in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

/// A decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedResult {
    /// Decoded text content.
    pub data: String,
    /// Symbol corners, when the decoder reports them.
    #[serde(default)]
    pub location: Option<Location>,
}

impl DecodedResult {
    /// Result carrying only text.
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            location: None,
        }
    }
}

/// The pixel-decode function: `(pixels, width, height) -> result | null`.
///
/// Implementations may fail on malformed input by returning a
/// [`DecodeFault`]. They must not hold per-frame state.
pub trait PixelDecoder: Send + Sync + 'static {
    /// Decode at most one symbol from the frame.
    fn decode(&self, frame: &PixelBuffer) -> Result<Option<DecodedResult>, DecodeFault>;
}

impl<F> PixelDecoder for F
where
    F: Fn(&PixelBuffer) -> Result<Option<DecodedResult>, DecodeFault> + Send + Sync + 'static,
{
    fn decode(&self, frame: &PixelBuffer) -> Result<Option<DecodedResult>, DecodeFault> {
        self(frame)
    }
}

/// Run a decoder, turning a panic into [`DecodeFault::Panicked`].
pub fn decode_contained(
    decoder: &dyn PixelDecoder,
    frame: &PixelBuffer,
) -> Result<Option<DecodedResult>, DecodeFault> {
    match catch_unwind(AssertUnwindSafe(|| decoder.decode(frame))) {
        Ok(outcome) => outcome,
        Err(panic) => Err(DecodeFault::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
