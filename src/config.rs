//! Scanner configuration.
//!
//! All fields have defaults, so an empty JSON object is a valid config:
//!
//! ```
//! use qrscan::config::ScannerConfig;
//!
//! let config = ScannerConfig::from_json(r#"{ "workerAckTimeout": 50 }"#).unwrap();
//! assert_eq!(config.worker_ack_timeout().as_millis(), 50);
//! assert_eq!(config.frame_interval().as_millis(), 16);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::Size;
use crate::error::Result;
use crate::handler::FaultPolicy;
use crate::media::Constraints;

/// Default wait for the worker's liveness ack.
pub const DEFAULT_WORKER_ACK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default bound on a single worker decode (zero = none).
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::ZERO;

/// Default pause between captured frames (about one display refresh).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Default capture region size.
pub const DEFAULT_CAPTURE_SIZE: Size = Size {
    width: 1280,
    height: 720,
};

/// Scanner options, as accepted from JSON (camelCase, milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Upper bound on waiting for worker liveness before falling back.
    #[serde(rename = "workerAckTimeout")]
    pub worker_ack_timeout_ms: u64,
    /// Upper bound on one worker decode; 0 waits indefinitely.
    #[serde(rename = "decodeTimeout")]
    pub decode_timeout_ms: u64,
    /// Pause between captured frames.
    #[serde(rename = "frameInterval")]
    pub frame_interval_ms: u64,
    /// Largest region cropped from the center of each video frame.
    pub capture_size: Size,
    /// Camera constraints.
    pub constraints: Constraints,
    /// Where decoder faults stop inside the worker.
    pub fault_policy: FaultPolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_ack_timeout_ms: DEFAULT_WORKER_ACK_TIMEOUT.as_millis() as u64,
            decode_timeout_ms: DEFAULT_DECODE_TIMEOUT.as_millis() as u64,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            capture_size: DEFAULT_CAPTURE_SIZE,
            constraints: Constraints::default(),
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl ScannerConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn worker_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ack_timeout_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    /// Frame interval, never below one millisecond.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}
