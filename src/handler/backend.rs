//! Stateless decode handler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pixels::{decode_contained, DecodeFault, DecodedResult, PixelDecoder};
use crate::protocol::{DecodeOutcome, Envelope, Request, Response};

/// Where a decoder fault is absorbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    /// Faults stay inside the worker and are answered with
    /// `{ success: false, result: null }`. Successful replies are wrapped
    /// as `{ success: true, result }`.
    #[default]
    Contain,
    /// Replies carry the raw `result | null`. A fault escapes the handler,
    /// which kills the worker and makes the controller recreate it.
    Propagate,
}

/// Answers envelopes inside the isolated context.
///
/// Holds no per-request state: every envelope is handled on its own and the
/// host delivers them one at a time.
#[derive(Clone)]
pub struct DecodeBackend {
    decoder: Arc<dyn PixelDecoder>,
    policy: FaultPolicy,
}

impl DecodeBackend {
    /// Create a handler around a pixel decoder.
    pub fn new(decoder: Arc<dyn PixelDecoder>, policy: FaultPolicy) -> Self {
        Self { decoder, policy }
    }

    /// Fault policy in effect.
    pub fn policy(&self) -> FaultPolicy {
        self.policy
    }

    /// Handle one envelope and produce the reply.
    ///
    /// Returns `Err` only under [`FaultPolicy::Propagate`], when the decoder
    /// faulted.
    pub fn handle(&self, envelope: Envelope<Request>) -> Result<Envelope<Response>, DecodeFault> {
        let Envelope { id, content } = envelope;

        let content = match content {
            Request::Ack => Response::Ack,
            Request::Decode(frame) => {
                let outcome = decode_contained(self.decoder.as_ref(), &frame);
                Response::Decode(self.wrap(outcome)?)
            }
        };

        Ok(Envelope::new(id, content))
    }

    fn wrap(
        &self,
        outcome: Result<Option<DecodedResult>, DecodeFault>,
    ) -> Result<DecodeOutcome, DecodeFault> {
        match (self.policy, outcome) {
            (FaultPolicy::Contain, Ok(result)) => Ok(DecodeOutcome::found(result)),
            (FaultPolicy::Contain, Err(fault)) => {
                tracing::warn!("Decode fault contained in worker: {}", fault);
                Ok(DecodeOutcome::faulted())
            }
            (FaultPolicy::Propagate, Ok(result)) => Ok(DecodeOutcome::Raw(result)),
            (FaultPolicy::Propagate, Err(fault)) => Err(fault),
        }
    }
}
