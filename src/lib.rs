//! # qrscan
//!
//! Live-camera QR scanning core.
//!
//! Frames are decoded on an isolated worker when one is available and on
//! the caller's task otherwise. The worker is reached only by message
//! passing; each request carries a correlation ID, so replies may arrive in
//! any order.
//!
//! ## Architecture
//!
//! - **Decoder facade** ([`Decoder`]): picks a backend at startup and routes
//!   every frame to it. Modes: `pending`, `worker`, `fallback`,
//!   `main-thread`, `failed`.
//! - **Worker lifecycle** ([`lifecycle`]): spawns the worker, runs the ack
//!   handshake, and replaces a crashed worker on the next request.
//! - **Message channel** ([`channel`]): request/response correlation over a
//!   [`transport::WorkerPort`], MsgPack on the wire.
//! - **Decode backend** ([`handler`]): runs inside the worker; answers
//!   `ack` and `decode` requests.
//!
//! ## Example
//!
//! ```ignore
//! use qrscan::{setup_scanner, ScannerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ScannerConfig::from_json(r#"{ "workerAckTimeout": 500 }"#).unwrap();
//!     let scanner = setup_scanner(config)
//!         .on_decode(|result| println!("scanned: {}", result.data))
//!         .on_scanner_load(|mode| println!("decoder ready ({})", mode))
//!         .start(camera_frames());
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     scanner.stop();
//! }
//! ```

pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod media;
pub mod pixels;
pub mod protocol;
pub mod scanner;
pub mod transport;

pub use capture::{CaptureLoop, CaptureRegion, FrameSource, Size};
pub use config::ScannerConfig;
pub use decoder::{Decoder, DecoderBuilder, DecoderMode, FallbackLoader, NoFallback, StaticFallback};
pub use error::{Result, ScannerError};
pub use handler::FaultPolicy;
pub use pixels::{DecodeFault, DecodedResult, PixelBuffer, PixelDecoder};
pub use scanner::{setup_scanner, Scanner, ScannerBuilder};
pub use transport::{ThreadSpawner, WorkerSpawner};

#[cfg(feature = "grid-decoder")]
pub use pixels::GridDecoder;
