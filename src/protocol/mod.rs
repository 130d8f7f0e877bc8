//! Protocol module - message envelopes exchanged with the decode worker.
//!
//! Wire shape (MsgPack map):
//! ```text
//! { id: string, content: { type: "ack" | "decode", data?: ... } }
//! ```
//!
//! - `id` is an opaque correlation token and must round-trip unchanged
//! - requests carry [`Request`] content, replies carry [`Response`] content
//! - an `ack` reply is the request echoed back verbatim

mod correlation;
mod envelope;

pub use correlation::CorrelationId;
pub use envelope::{DecodeOutcome, Envelope, Request, Response};
