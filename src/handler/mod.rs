//! Handler module - the request handler running inside the decode worker.
//!
//! Provides:
//! - [`DecodeBackend`] - answers `ack` and `decode` envelopes
//! - [`FaultPolicy`] - where a decoder fault stops
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use qrscan::handler::{DecodeBackend, FaultPolicy};
//! use qrscan::pixels::{DecodeFault, DecodedResult, PixelBuffer};
//! use qrscan::protocol::{CorrelationId, Envelope, Request, Response};
//!
//! let decoder = |_: &PixelBuffer| -> Result<Option<DecodedResult>, DecodeFault> { Ok(None) };
//! let backend = DecodeBackend::new(Arc::new(decoder), FaultPolicy::Contain);
//!
//! let reply = backend
//!     .handle(Envelope::new(CorrelationId::generate(), Request::Ack))
//!     .unwrap();
//! assert_eq!(reply.content, Response::Ack);
//! ```

mod backend;

pub use backend::{DecodeBackend, FaultPolicy};
