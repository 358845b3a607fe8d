//! Relay channel client.
//!
//! Wraps a [`SignalingTransport`] with the relay's registration handshake:
//! nothing but the register frame may go out until registration completes,
//! so application sends are buffered in order and flushed the moment the
//! register frame is written. Inbound frames are unwrapped from the relay
//! envelope; frames arriving before registration are dropped with a
//! warning.
//!
//! Closing is two-step: a `bye` through the still-registered channel, then
//! a transport close with a bounded wait for the close acknowledgment.
//! When the wait times out, closure proceeds best-effort.

use crate::errors::SessionError;
use crate::transport::{SignalingTransport, TransportEvent};
use signaling_protocol::relay::{RelayCommand, RelayFrame, RelayPayload};
use signaling_protocol::SignalingMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    New,
    Connected,
    Registered,
    Closed,
    Error,
}

/// What an inbound transport event means to the signaling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInbound {
    /// An application payload (inner JSON of a relay frame).
    Payload(String),
    /// The relay reported an error for this session.
    RelayError(String),
    /// The channel closed.
    Closed,
    /// The transport failed or delivered a malformed frame.
    Fault(String),
}

/// Relay channel client. Owned and driven by the session actor.
pub struct ChannelClient {
    transport: Box<dyn SignalingTransport>,
    events: mpsc::Receiver<TransportEvent>,
    state: ChannelState,
    send_queue: Vec<String>,
    close_timeout: Duration,
}

impl ChannelClient {
    /// Wrap a connected transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport's event stream was already
    /// taken.
    pub fn new(
        mut transport: Box<dyn SignalingTransport>,
        close_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let events = transport.take_events().ok_or_else(|| {
            SessionError::Channel("Transport event stream already taken".to_string())
        })?;
        Ok(Self {
            transport,
            events,
            state: ChannelState::Connected,
            send_queue: Vec::new(),
            close_timeout,
        })
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Identify this session to the relay and flush buffered sends.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside the `Connected` state or when
    /// the transport rejects a write.
    pub async fn register(&mut self, room_id: &str, client_id: &str) -> Result<(), SessionError> {
        if self.state != ChannelState::Connected {
            return Err(SessionError::Channel(format!(
                "Register called in state {:?}",
                self.state
            )));
        }
        let frame = RelayCommand::Register {
            roomid: room_id.to_string(),
            clientid: client_id.to_string(),
        }
        .to_json()
        .map_err(|e| SessionError::Channel(e.to_string()))?;
        self.transport.send(frame).await?;
        self.state = ChannelState::Registered;
        debug!(
            target: "session.channel",
            room_id = %room_id,
            client_id = %client_id,
            queued = self.send_queue.len(),
            "Registered with relay"
        );

        let queued: Vec<String> = self.send_queue.drain(..).collect();
        for payload in queued {
            self.send_wrapped(payload).await?;
        }
        Ok(())
    }

    /// Send an application payload, buffering until registration completes.
    ///
    /// Sends after the channel closed or failed are dropped with a warning;
    /// the session has already been told about the closure.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the write.
    pub async fn send(&mut self, payload: String) -> Result<(), SessionError> {
        match self.state {
            ChannelState::New | ChannelState::Connected => {
                self.send_queue.push(payload);
                Ok(())
            }
            ChannelState::Registered => self.send_wrapped(payload).await,
            ChannelState::Closed | ChannelState::Error => {
                warn!(target: "session.channel", state = ?self.state, "Send on closed channel dropped");
                Ok(())
            }
        }
    }

    async fn send_wrapped(&mut self, payload: String) -> Result<(), SessionError> {
        let frame = RelayCommand::Send { msg: payload }
            .to_json()
            .map_err(|e| SessionError::Channel(e.to_string()))?;
        self.transport.send(frame).await
    }

    /// Wait for the next raw transport event.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Interpret one transport event. `None` means nothing for the
    /// signaling layer (keep-alives, pre-registration noise).
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<ChannelInbound> {
        match event {
            TransportEvent::Open => None,
            TransportEvent::Message(text) => {
                if self.state != ChannelState::Registered {
                    warn!(
                        target: "session.channel",
                        state = ?self.state,
                        "Inbound frame before registration dropped"
                    );
                    return None;
                }
                match RelayFrame::from_json(&text).and_then(RelayFrame::into_payload) {
                    Ok(RelayPayload::Message(inner)) => Some(ChannelInbound::Payload(inner)),
                    Ok(RelayPayload::Error(e)) => Some(ChannelInbound::RelayError(e)),
                    Err(e) => Some(ChannelInbound::Fault(format!("Malformed relay frame: {e}"))),
                }
            }
            TransportEvent::Closed => {
                if self.state != ChannelState::Closed {
                    self.state = ChannelState::Closed;
                }
                Some(ChannelInbound::Closed)
            }
            TransportEvent::Error(e) => {
                self.state = ChannelState::Error;
                Some(ChannelInbound::Fault(e))
            }
        }
    }

    /// Close the channel: `bye` while registered, then a transport close
    /// bounded by the configured acknowledgment timeout.
    pub async fn close(&mut self) {
        if matches!(self.state, ChannelState::Closed) {
            return;
        }
        if self.state == ChannelState::Registered {
            match SignalingMessage::Bye.to_json() {
                Ok(bye) => {
                    if let Err(e) = self.send_wrapped(bye).await {
                        debug!(target: "session.channel", error = %e, "Bye not delivered");
                    }
                }
                Err(e) => debug!(target: "session.channel", error = %e, "Bye not encoded"),
            }
            self.state = ChannelState::Connected;
        }

        self.transport.close().await;
        let acked = tokio::time::timeout(self.close_timeout, async {
            while let Some(event) = self.events.recv().await {
                if matches!(event, TransportEvent::Closed) {
                    return;
                }
            }
        })
        .await;
        if acked.is_err() {
            warn!(target: "session.channel", "Close acknowledgment timed out, proceeding");
        }
        self.state = ChannelState::Closed;
        debug!(target: "session.channel", "Channel closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Transport double: records writes, lets the test inject events.
    struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
        events_tx: mpsc::Sender<TransportEvent>,
        events_rx: Option<mpsc::Receiver<TransportEvent>>,
        closed: Arc<Mutex<bool>>,
        ack_close: bool,
    }

    impl FakeTransport {
        fn new(ack_close: bool) -> (Self, Arc<Mutex<Vec<String>>>, mpsc::Sender<TransportEvent>) {
            let (events_tx, events_rx) = mpsc::channel(16);
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                sent: Arc::clone(&sent),
                events_tx: events_tx.clone(),
                events_rx: Some(events_rx),
                closed: Arc::new(Mutex::new(false)),
                ack_close,
            };
            (transport, sent, events_tx)
        }
    }

    #[async_trait]
    impl SignalingTransport for FakeTransport {
        async fn send(&mut self, text: String) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
            if self.ack_close {
                let _ = self.events_tx.send(TransportEvent::Closed).await;
            }
        }

        fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
            self.events_rx.take()
        }
    }

    fn client(ack_close: bool) -> (ChannelClient, Arc<Mutex<Vec<String>>>, mpsc::Sender<TransportEvent>) {
        let (transport, sent, events_tx) = FakeTransport::new(ack_close);
        let client = ChannelClient::new(Box::new(transport), Duration::from_millis(100)).unwrap();
        (client, sent, events_tx)
    }

    #[tokio::test]
    async fn test_sends_before_registration_flush_in_order() {
        let (mut channel, sent, _events) = client(true);

        channel.send("{\"type\":\"offer\",\"sdp\":\"a\"}".to_string()).await.unwrap();
        channel.send("{\"type\":\"candidate\"}".to_string()).await.unwrap();
        assert!(sent.lock().unwrap().is_empty());

        channel.register("room-1", "client-1").await.unwrap();

        let frames = sent.lock().unwrap().clone();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\"cmd\":\"register\""));
        assert!(frames[0].contains("room-1"));
        assert!(frames[1].contains("offer"));
        assert!(frames[2].contains("candidate"));
        // Post-registration frames carry the send envelope.
        assert!(frames[1].starts_with("{\"cmd\":\"send\""));
    }

    #[tokio::test]
    async fn test_send_after_registration_goes_straight_out() {
        let (mut channel, sent, _events) = client(true);
        channel.register("r", "c").await.unwrap();

        channel.send("{\"type\":\"bye\"}".to_string()).await.unwrap();
        let frames = sent.lock().unwrap().clone();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\\\"bye\\\""));
    }

    #[tokio::test]
    async fn test_register_twice_is_an_error() {
        let (mut channel, _sent, _events) = client(true);
        channel.register("r", "c").await.unwrap();
        assert!(channel.register("r", "c").await.is_err());
    }

    #[tokio::test]
    async fn test_inbound_before_registration_is_dropped() {
        let (mut channel, _sent, _events) = client(true);
        let inbound =
            channel.handle_event(TransportEvent::Message("{\"msg\":\"{}\"}".to_string()));
        assert!(inbound.is_none());
    }

    #[tokio::test]
    async fn test_inbound_frames_unwrap_after_registration() {
        let (mut channel, _sent, _events) = client(true);
        channel.register("r", "c").await.unwrap();

        let inbound = channel
            .handle_event(TransportEvent::Message(
                "{\"msg\":\"{\\\"type\\\":\\\"bye\\\"}\"}".to_string(),
            ))
            .unwrap();
        assert_eq!(inbound, ChannelInbound::Payload("{\"type\":\"bye\"}".to_string()));

        let relay_error = channel
            .handle_event(TransportEvent::Message(
                "{\"msg\":\"\",\"error\":\"no peer\"}".to_string(),
            ))
            .unwrap();
        assert_eq!(relay_error, ChannelInbound::RelayError("no peer".to_string()));

        let fault = channel
            .handle_event(TransportEvent::Message("{broken".to_string()))
            .unwrap();
        assert!(matches!(fault, ChannelInbound::Fault(_)));
    }

    #[tokio::test]
    async fn test_close_sends_bye_and_waits_for_ack() {
        let (mut channel, sent, _events) = client(true);
        channel.register("r", "c").await.unwrap();

        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        let frames = sent.lock().unwrap().clone();
        // register + wrapped bye
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("bye"));
    }

    #[tokio::test]
    async fn test_close_proceeds_after_ack_timeout() {
        let (mut channel, _sent, _events) = client(false);
        channel.register("r", "c").await.unwrap();

        let started = std::time::Instant::now();
        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        // The bounded wait ran, then closure proceeded anyway.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let (mut channel, sent, _events) = client(true);
        channel.register("r", "c").await.unwrap();
        channel.close().await;

        let before = sent.lock().unwrap().len();
        channel.send("{\"type\":\"bye\"}".to_string()).await.unwrap();
        assert_eq!(sent.lock().unwrap().len(), before);
    }
}
