//! Envelope and content types.

use serde::{Deserialize, Serialize};

use super::CorrelationId;
use crate::pixels::{DecodedResult, PixelBuffer};

/// A message tagged with its correlation ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<C> {
    /// Correlation token, echoed unchanged in the reply.
    pub id: CorrelationId,
    /// Message body.
    pub content: C,
}

impl<C> Envelope<C> {
    pub fn new(id: CorrelationId, content: C) -> Self {
        Self { id, content }
    }

    /// Build a reply carrying the same ID.
    pub fn reply<R>(&self, content: R) -> Envelope<R> {
        Envelope {
            id: self.id.clone(),
            content,
        }
    }
}

/// Controller-to-worker content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Request {
    /// Liveness probe.
    Ack,
    /// Decode one frame.
    Decode(PixelBuffer),
}

/// Worker-to-controller content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Response {
    /// Echo of an [`Request::Ack`].
    Ack,
    /// Result of a [`Request::Decode`].
    Decode(DecodeOutcome),
}

/// Payload of a decode reply.
///
/// Workers may answer in either shape; which one depends on the worker's
/// fault policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodeOutcome {
    /// `{ success, result }`: a fault is reported as `success: false`.
    Wrapped {
        success: bool,
        result: Option<DecodedResult>,
    },
    /// The decoder's result as-is, `null` when nothing was found.
    Raw(Option<DecodedResult>),
}

impl DecodeOutcome {
    /// Successful wrapped outcome.
    pub fn found(result: Option<DecodedResult>) -> Self {
        DecodeOutcome::Wrapped {
            success: true,
            result,
        }
    }

    /// Wrapped outcome for a fault.
    pub fn faulted() -> Self {
        DecodeOutcome::Wrapped {
            success: false,
            result: None,
        }
    }

    /// Whether the worker reported a fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, DecodeOutcome::Wrapped { success: false, .. })
    }

    /// The decoded result, `None` for faults and empty frames.
    pub fn into_result(self) -> Option<DecodedResult> {
        match self {
            DecodeOutcome::Wrapped {
                success: true,
                result,
            } => result,
            DecodeOutcome::Wrapped { success: false, .. } => None,
            DecodeOutcome::Raw(result) => result,
        }
    }
}
