//! In-memory transport pair and relay-side harness.
//!
//! [`MemoryTransport::pair`] yields two connected transports; whatever one
//! side sends arrives as a message event on the other. [`RemoteRelay`]
//! wraps one side with the relay envelope protocol so tests can play the
//! remote end of a registered signaling channel.

use async_trait::async_trait;
use session_controller::errors::SessionError;
use session_controller::transport::{
    SignalingTransport, TransportConnector, TransportEvent, TRANSPORT_EVENT_BUFFER,
};
use signaling_protocol::SignalingMessage;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One side of an in-memory transport pair.
pub struct MemoryTransport {
    peer_tx: mpsc::Sender<TransportEvent>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl MemoryTransport {
    /// Create two connected transports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (tx_b, rx_b) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let a = Self {
            peer_tx: tx_b.clone(),
            events_tx: tx_a.clone(),
            events_rx: Some(rx_a),
        };
        let b = Self {
            peer_tx: tx_a,
            events_tx: tx_b,
            events_rx: Some(rx_b),
        };
        (a, b)
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.peer_tx
            .send(TransportEvent::Message(text))
            .await
            .map_err(|_| SessionError::Channel("Peer transport is gone".to_string()))
    }

    async fn close(&mut self) {
        let _ = self.peer_tx.send(TransportEvent::Closed).await;
        // Local close acknowledgment, like a completed close handshake.
        let _ = self.events_tx.send(TransportEvent::Closed).await;
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }
}

/// Connector handing out a pre-built transport, recording requested URLs.
pub struct MemoryConnector {
    transport: Mutex<Option<MemoryTransport>>,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(transport: MemoryTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// The endpoint URLs connect was called with.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SignalingTransport>, SessionError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.transport
            .lock()
            .unwrap()
            .take()
            .map(|t| Box::new(t) as Box<dyn SignalingTransport>)
            .ok_or_else(|| SessionError::Channel("Transport already taken".to_string()))
    }
}

/// The remote end of a registered relay channel, for driving a session
/// from a test.
pub struct RemoteRelay {
    transport: MemoryTransport,
    events: mpsc::Receiver<TransportEvent>,
}

impl RemoteRelay {
    /// Wrap the relay-side transport of a pair.
    #[must_use]
    pub fn new(mut transport: MemoryTransport) -> Self {
        let events = transport
            .take_events()
            .expect("relay transport events already taken");
        Self { transport, events }
    }

    /// Next raw frame the session wrote, or `None` once the channel closed.
    pub async fn recv_raw(&mut self) -> Option<String> {
        loop {
            match self.events.recv().await? {
                TransportEvent::Message(text) => return Some(text),
                TransportEvent::Closed | TransportEvent::Error(_) => return None,
                TransportEvent::Open => {}
            }
        }
    }

    /// Expect the registration frame and return (room id, client id).
    pub async fn expect_register(&mut self) -> (String, String) {
        let raw = self.recv_raw().await.expect("expected a register frame");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("register frame is JSON");
        assert_eq!(value["cmd"], "register", "expected register, got: {raw}");
        (
            value["roomid"].as_str().expect("roomid").to_string(),
            value["clientid"].as_str().expect("clientid").to_string(),
        )
    }

    /// Expect a wrapped application message and decode its payload.
    pub async fn recv_app_message(&mut self) -> SignalingMessage {
        let raw = self.recv_raw().await.expect("expected an application frame");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("frame is JSON");
        assert_eq!(value["cmd"], "send", "expected send envelope, got: {raw}");
        let inner = value["msg"].as_str().expect("msg payload");
        SignalingMessage::from_json(inner).expect("payload decodes")
    }

    /// Deliver an application message to the session, relay-wrapped.
    pub async fn deliver(&mut self, message: &SignalingMessage) {
        let inner = message.to_json().expect("message encodes");
        let frame = serde_json::json!({ "msg": inner }).to_string();
        self.transport.send(frame).await.expect("session side is open");
    }

    /// Deliver a relay-level error frame.
    pub async fn deliver_error(&mut self, error: &str) {
        let frame = serde_json::json!({ "msg": "", "error": error }).to_string();
        self.transport.send(frame).await.expect("session side is open");
    }

    /// Deliver a raw frame verbatim (for malformed-input tests).
    pub async fn deliver_raw(&mut self, frame: &str) {
        self.transport
            .send(frame.to_string())
            .await
            .expect("session side is open");
    }

    /// Close the channel from the remote side.
    pub async fn close(&mut self) {
        self.transport.close().await;
    }
}
