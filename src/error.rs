//! Error types for qrscan.

use std::time::Duration;

use thiserror::Error;

use crate::pixels::DecodeFault;

/// Main error type for all scanner operations.
///
/// None of these ever reach the consumer callbacks: the decoder facade
/// turns them into a log line and a `None` result.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// I/O error (thread spawn, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (unexpected response kind, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response arrived within the given limit.
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The channel was torn down or the worker died before responding.
    #[error("Channel closed")]
    ChannelClosed,

    /// The isolated execution context could not be created.
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The lifecycle manager was shut down.
    #[error("Worker terminated")]
    Terminated,

    /// The pixel decoder failed on a frame.
    #[error("Decode fault: {0}")]
    Decode(#[from] DecodeFault),

    /// The main-thread decoder could not be loaded.
    #[error("Fallback decoder unavailable: {0}")]
    FallbackUnavailable(String),

    /// Camera stream acquisition failed.
    #[error("Media error: {0}")]
    Media(String),
}

/// Result type alias using ScannerError.
pub type Result<T> = std::result::Result<T, ScannerError>;
