//! Camera stream bookkeeping.
//!
//! Acquiring a camera is slow and may be cancelled before it completes. The
//! [`StreamRegistry`] tracks each request as `Created -> Started` and turns
//! a close on a `Created` entry into `Cancelled`, so the stream is released
//! the moment it arrives instead of leaking an open camera.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decoder::BoxFuture;
use crate::error::Result;

/// Preferred camera direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

/// Video track constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConstraints {
    pub facing_mode: FacingMode,
}

/// Constraints passed to the media source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub audio: bool,
    pub video: VideoConstraints,
}

/// A live video stream.
pub trait VideoStream: Send + Sync {
    /// Stop all tracks and release the device.
    fn stop(&self);
}

/// Yields live streams for a set of constraints.
pub trait MediaSource: Send + Sync + 'static {
    fn acquire(&self, constraints: &Constraints) -> BoxFuture<'static, Result<Arc<dyn VideoStream>>>;
}

/// Registry key for one stream request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(String);

impl StreamId {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Requested, not yet delivered.
    Created,
    /// Delivered and live.
    Started,
    /// Closed before delivery; released on arrival.
    Cancelled,
}

enum Entry {
    Created,
    Started(Arc<dyn VideoStream>),
    Cancelled,
}

impl Entry {
    fn state(&self) -> StreamState {
        match self {
            Entry::Created => StreamState::Created,
            Entry::Started(_) => StreamState::Started,
            Entry::Cancelled => StreamState::Cancelled,
        }
    }
}

/// A pending stream request returned by [`StreamRegistry::open`].
#[derive(Debug, Clone)]
pub struct StreamTicket {
    id: StreamId,
    constraints: Constraints,
}

impl StreamTicket {
    pub fn id(&self) -> &StreamId {
        &self.id
    }
}

/// Owns every stream request made through it.
pub struct StreamRegistry {
    source: Arc<dyn MediaSource>,
    entries: Mutex<HashMap<StreamId, Entry>>,
}

impl StreamRegistry {
    pub fn new(source: impl MediaSource) -> Self {
        Self {
            source: Arc::new(source),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new request. Cancelled leftovers are purged first.
    pub fn open(&self, constraints: Constraints) -> StreamTicket {
        let id = StreamId::generate();
        let mut entries = self.lock();
        entries.retain(|_, entry| !matches!(entry, Entry::Cancelled));
        entries.insert(id.clone(), Entry::Created);

        StreamTicket { id, constraints }
    }

    /// Acquire the stream for a ticket.
    ///
    /// Returns `None` when acquisition fails or the ticket was closed
    /// meanwhile; in the latter case the stream is stopped on arrival.
    pub async fn acquire(&self, ticket: &StreamTicket) -> Option<Arc<dyn VideoStream>> {
        let stream = match self.source.acquire(&ticket.constraints).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start stream {}: {}", ticket.id, e);
                self.lock().remove(&ticket.id);
                return None;
            }
        };

        let live = {
            let mut entries = self.lock();
            match entries.get(&ticket.id) {
                Some(Entry::Created) => {
                    entries.insert(ticket.id.clone(), Entry::Started(stream.clone()));
                    true
                }
                Some(Entry::Started(_)) => {
                    tracing::warn!("Stream {} already started", ticket.id);
                    false
                }
                Some(Entry::Cancelled) | None => {
                    tracing::warn!("Stream {} cancelled before it started", ticket.id);
                    entries.remove(&ticket.id);
                    false
                }
            }
        };

        if live {
            Some(stream)
        } else {
            stream.stop();
            None
        }
    }

    /// Release a stream, or cancel a request still in flight.
    pub fn close(&self, id: &StreamId) {
        let removed = {
            let mut entries = self.lock();
            match entries.remove(id) {
                Some(Entry::Created) => {
                    entries.insert(id.clone(), Entry::Cancelled);
                    None
                }
                Some(Entry::Started(stream)) => Some(stream),
                Some(Entry::Cancelled) | None => None,
            }
        };

        if let Some(stream) = removed {
            stream.stop();
            tracing::debug!("Stream {} stopped", id);
        }
    }

    /// State of a request, `None` once it is gone.
    pub fn state(&self, id: &StreamId) -> Option<StreamState> {
        self.lock().get(id).map(Entry::state)
    }

    /// Number of tracked requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScannerError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeStream {
        stopped: AtomicBool,
    }

    impl VideoStream for FakeStream {
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Source that hands out one stream once `gate` is notified.
    struct GatedSource {
        stream: Arc<FakeStream>,
        gate: Arc<Notify>,
        fail: bool,
    }

    impl MediaSource for GatedSource {
        fn acquire(&self, _: &Constraints) -> BoxFuture<'static, Result<Arc<dyn VideoStream>>> {
            let stream = self.stream.clone();
            let gate = self.gate.clone();
            let fail = self.fail;
            Box::pin(async move {
                gate.notified().await;
                if fail {
                    return Err(ScannerError::Media("permission denied".into()));
                }
                Ok(stream as Arc<dyn VideoStream>)
            })
        }
    }

    fn registry(fail: bool) -> (Arc<StreamRegistry>, Arc<FakeStream>, Arc<Notify>) {
        let stream = Arc::new(FakeStream::default());
        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            stream: stream.clone(),
            gate: gate.clone(),
            fail,
        };
        (Arc::new(StreamRegistry::new(source)), stream, gate)
    }

    #[tokio::test]
    async fn test_acquire_then_close() {
        let (registry, stream, gate) = registry(false);
        let ticket = registry.open(Constraints::default());
        assert_eq!(registry.state(ticket.id()), Some(StreamState::Created));

        gate.notify_one();
        assert!(registry.acquire(&ticket).await.is_some());
        assert_eq!(registry.state(ticket.id()), Some(StreamState::Started));

        registry.close(ticket.id());
        assert!(stream.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.state(ticket.id()), None);
    }

    #[tokio::test]
    async fn test_cancel_before_ready_releases_on_arrival() {
        let (registry, stream, gate) = registry(false);
        let ticket = registry.open(Constraints::default());

        let pending = {
            let registry = registry.clone();
            let ticket = ticket.clone();
            tokio::spawn(async move { registry.acquire(&ticket).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.close(ticket.id());
        assert_eq!(registry.state(ticket.id()), Some(StreamState::Cancelled));
        assert!(!stream.stopped.load(Ordering::SeqCst));

        gate.notify_one();
        assert!(!pending.await.unwrap());
        assert!(stream.stopped.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_open_purges_cancelled_entries() {
        let (registry, stream, gate) = registry(false);
        let first = registry.open(Constraints::default());
        registry.close(first.id());

        let second = registry.open(Constraints::default());
        assert_eq!(registry.len(), 1);

        // The purged request still releases its stream when it lands
        gate.notify_one();
        assert!(registry.acquire(&first).await.is_none());
        assert!(stream.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.state(second.id()), Some(StreamState::Created));
    }

    #[tokio::test]
    async fn test_failed_acquisition_is_forgotten() {
        let (registry, _stream, gate) = registry(true);
        let ticket = registry.open(Constraints::default());

        gate.notify_one();
        assert!(registry.acquire(&ticket).await.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_constraints_json_shape() {
        let value = serde_json::to_value(Constraints::default()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "audio": false, "video": { "facingMode": "environment" } })
        );
    }
}
