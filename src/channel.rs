//! Request/response correlation across the worker boundary.
//!
//! [`MessageChannel::send`] tags each request with a fresh
//! [`CorrelationId`], parks a resolver in the pending registry, and posts
//! the envelope. A reader task drains the worker's events and hands each
//! reply to the resolver with the same ID.
//!
//! ```text
//! send() ──► registry.insert(id) ──► WorkerPort ──► worker
//!   ▲                                                  │
//!   └──── oneshot ◄── registry.remove(id) ◄── reader ◄─┘
//! ```
//!
//! Replies for unknown IDs (timed out, or never ours) are dropped. When the
//! worker reports an error the channel faults and every parked resolver is
//! dropped, so waiting callers see [`ScannerError::ChannelClosed`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{Result, ScannerError};
use crate::protocol::{CorrelationId, Envelope, Request, Response};
use crate::transport::{WorkerEvent, WorkerPort};

/// Health of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Worker reachable.
    Open,
    /// Worker reported an error or exited on its own.
    Faulted,
    /// Torn down by the controller.
    Closed,
}

/// Pending resolvers plus status, under one lock so that a request can
/// never be parked on a channel that has already faulted.
struct Registry {
    pending: HashMap<CorrelationId, oneshot::Sender<Response>>,
    status: ChannelStatus,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Correlating channel to one worker.
pub struct MessageChannel {
    registry: SharedRegistry,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl MessageChannel {
    /// Attach to a worker port and start reading its events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(port: WorkerPort) -> Self {
        let WorkerPort { outbound, inbound } = port;

        let registry = Arc::new(Mutex::new(Registry {
            pending: HashMap::new(),
            status: ChannelStatus::Open,
        }));

        let reader = tokio::spawn(read_loop(inbound, registry.clone()));

        Self {
            registry,
            outbound: Mutex::new(Some(outbound)),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Send a request and wait for the matching response.
    ///
    /// A zero `timeout` waits indefinitely. On timeout the pending entry is
    /// left in place; a late reply is matched and discarded.
    pub async fn send(&self, content: Request, timeout: Duration) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        let id = self.register(tx)?;

        let bytes = match MsgPackCodec::encode(&Envelope::new(id.clone(), content)) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                self.forget(&id);
                return Err(e);
            }
        };

        if !self.post(bytes) {
            self.forget(&id);
            return Err(ScannerError::ChannelClosed);
        }

        if timeout.is_zero() {
            return rx.await.map_err(|_| ScannerError::ChannelClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(response) => response.map_err(|_| ScannerError::ChannelClosed),
            Err(_) => {
                tracing::debug!("Request {} timed out after {:?}", id, timeout);
                Err(ScannerError::Timeout(timeout))
            }
        }
    }

    /// Current status.
    pub fn status(&self) -> ChannelStatus {
        lock(&self.registry).status
    }

    /// Number of requests still awaiting a reply (timed-out ones included).
    pub fn pending_count(&self) -> usize {
        lock(&self.registry).pending.len()
    }

    /// Tear down: stop reading, terminate the worker, abandon pending
    /// requests. Safe to call more than once.
    pub fn close(&self) {
        {
            let mut registry = lock(&self.registry);
            if registry.status == ChannelStatus::Closed {
                return;
            }
            registry.status = ChannelStatus::Closed;
            registry.pending.clear();
        }

        // Dropping the sender closes the worker's inbox
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
    }

    fn register(&self, resolver: oneshot::Sender<Response>) -> Result<CorrelationId> {
        let mut registry = lock(&self.registry);
        if registry.status != ChannelStatus::Open {
            return Err(ScannerError::ChannelClosed);
        }

        let mut id = CorrelationId::generate();
        while registry.pending.contains_key(&id) {
            id = CorrelationId::generate();
        }

        registry.pending.insert(id.clone(), resolver);
        Ok(id)
    }

    fn forget(&self, id: &CorrelationId) {
        lock(&self.registry).pending.remove(id);
    }

    fn post(&self, bytes: Bytes) -> bool {
        match self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader task: route replies to their resolvers until the worker goes away.
async fn read_loop(mut inbound: mpsc::UnboundedReceiver<WorkerEvent>, registry: SharedRegistry) {
    while let Some(event) = inbound.recv().await {
        match event {
            WorkerEvent::Message(bytes) => deliver(&registry, &bytes),
            WorkerEvent::Error(reason) => {
                tracing::warn!("Decode worker faulted: {}", reason);
                fault(&registry);
                return;
            }
        }
    }

    let status = lock(&registry).status;
    if status == ChannelStatus::Open {
        tracing::warn!("Decode worker exited without reporting an error");
        fault(&registry);
    }
}

fn deliver(registry: &Mutex<Registry>, bytes: &[u8]) {
    let envelope: Envelope<Response> = match MsgPackCodec::decode(bytes) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("Discarding malformed reply: {}", e);
            return;
        }
    };

    let resolver = lock(registry).pending.remove(&envelope.id);
    match resolver {
        Some(tx) => {
            if tx.send(envelope.content).is_err() {
                tracing::debug!("Reply {} arrived after its caller gave up", envelope.id);
            }
        }
        None => tracing::debug!("No pending request for reply {}", envelope.id),
    }
}

fn fault(registry: &Mutex<Registry>) {
    let mut registry = lock(registry);
    if registry.status == ChannelStatus::Open {
        registry.status = ChannelStatus::Faulted;
    }
    let abandoned = registry.pending.len();
    registry.pending.clear();
    if abandoned > 0 {
        tracing::debug!("Abandoned {} in-flight request(s)", abandoned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::{DecodedResult, PixelBuffer};
    use crate::protocol::DecodeOutcome;
    use crate::transport::WorkerEndpoint;

    fn decode_request(width: u32) -> Request {
        Request::Decode(PixelBuffer::filled(0, width, 1))
    }

    fn width_reply(request: &Envelope<Request>) -> Envelope<Response> {
        match &request.content {
            Request::Ack => request.reply(Response::Ack),
            Request::Decode(frame) => request.reply(Response::Decode(DecodeOutcome::found(Some(
                DecodedResult::text(frame.width.to_string()),
            )))),
        }
    }

    fn post(endpoint: &WorkerEndpoint, reply: &Envelope<Response>) {
        endpoint.post(MsgPackCodec::encode(reply).unwrap());
    }

    async fn next_request(endpoint: &mut WorkerEndpoint) -> Envelope<Request> {
        let bytes = endpoint.recv().await.unwrap();
        MsgPackCodec::decode(&bytes).unwrap()
    }

    /// Worker task answering every request immediately.
    fn spawn_echo_worker(mut endpoint: WorkerEndpoint) {
        tokio::spawn(async move {
            while let Some(bytes) = endpoint.recv().await {
                let request: Envelope<Request> = MsgPackCodec::decode(&bytes).unwrap();
                post(&endpoint, &width_reply(&request));
            }
        });
    }

    fn expect_text(response: Response) -> String {
        match response {
            Response::Decode(outcome) => outcome.into_result().unwrap().data,
            other => panic!("expected decode reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ack_roundtrip() {
        let (port, endpoint) = WorkerPort::pair();
        spawn_echo_worker(endpoint);
        let channel = MessageChannel::open(port);

        let response = channel.send(Request::Ack, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response, Response::Ack);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_replies_correlate_in_reverse_order() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = Arc::new(MessageChannel::open(port));

        let mut calls = Vec::new();
        for width in 1..=5u32 {
            let channel = channel.clone();
            calls.push(tokio::spawn(async move {
                let response = channel.send(decode_request(width), Duration::ZERO).await;
                (width, response)
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..5 {
            requests.push(next_request(&mut endpoint).await);
        }
        for request in requests.iter().rev() {
            post(&endpoint, &width_reply(request));
        }

        for call in calls {
            let (width, response) = call.await.unwrap();
            assert_eq!(expect_text(response.unwrap()), width.to_string());
        }
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique_per_request() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = Arc::new(MessageChannel::open(port));

        for _ in 0..3 {
            let channel = channel.clone();
            tokio::spawn(async move {
                let _ = channel.send(Request::Ack, Duration::ZERO).await;
            });
        }

        let a = next_request(&mut endpoint).await.id;
        let b = next_request(&mut endpoint).await.id;
        let c = next_request(&mut endpoint).await.id;
        assert!(a != b && b != c && a != c);
    }

    #[tokio::test]
    async fn test_timeout_keeps_pending_entry() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = MessageChannel::open(port);

        let result = channel.send(Request::Ack, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ScannerError::Timeout(_))));
        assert_eq!(channel.pending_count(), 1);

        // A late reply is matched, then discarded
        let request = next_request(&mut endpoint).await;
        post(&endpoint, &request.reply(Response::Ack));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.pending_count(), 0);
        assert_eq!(channel.status(), ChannelStatus::Open);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_replies_are_ignored() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = Arc::new(MessageChannel::open(port));

        let pending = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send(decode_request(7), Duration::ZERO).await })
        };
        let request = next_request(&mut endpoint).await;

        endpoint.post(Bytes::from_static(b"not an envelope"));
        post(
            &endpoint,
            &Envelope::new(CorrelationId::from("stranger"), Response::Ack),
        );
        post(&endpoint, &width_reply(&request));

        assert_eq!(expect_text(pending.await.unwrap().unwrap()), "7");
        assert_eq!(channel.status(), ChannelStatus::Open);
    }

    #[tokio::test]
    async fn test_worker_error_abandons_in_flight_requests() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = Arc::new(MessageChannel::open(port));

        let pending = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send(decode_request(1), Duration::ZERO).await })
        };
        let _ = next_request(&mut endpoint).await;
        endpoint.fail("segfault in decoder");

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ScannerError::ChannelClosed)));
        assert_eq!(channel.status(), ChannelStatus::Faulted);

        let again = channel.send(Request::Ack, Duration::ZERO).await;
        assert!(matches!(again, Err(ScannerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_silent_worker_exit_faults_channel() {
        let (port, endpoint) = WorkerPort::pair();
        let channel = MessageChannel::open(port);

        drop(endpoint);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(channel.status(), ChannelStatus::Faulted);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminates_worker() {
        let (port, mut endpoint) = WorkerPort::pair();
        let channel = MessageChannel::open(port);

        channel.close();
        channel.close();

        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert_eq!(endpoint.recv().await, None);

        let result = channel.send(Request::Ack, Duration::ZERO).await;
        assert!(matches!(result, Err(ScannerError::ChannelClosed)));
    }
}
