//! Media engine contract.
//!
//! The session controller never touches codecs, RTP or ICE connectivity
//! itself; it drives an engine through this trait and reacts to the events
//! the engine emits. Results are explicit: every call that the engine
//! resolves asynchronously returns a `Result` awaited on the coordinator's
//! own task, and engine-originated events arrive through an mpsc stream
//! taken once at coordinator start.

use async_trait::async_trait;
use signaling_protocol::room::IceServer;
use signaling_protocol::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

/// Buffer size for the engine event stream.
pub const ENGINE_EVENT_BUFFER: usize = 64;

/// Failure reported by the engine for a single operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct EngineError {
    pub reason: String,
}

impl EngineError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// ICE connectivity states surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Events the engine pushes while a connection is live.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine gathered a local candidate to signal to the peer.
    LocalCandidate(IceCandidate),
    /// Previously gathered local candidates are withdrawn.
    LocalCandidatesRemoved(Vec<IceCandidate>),
    /// ICE connectivity changed.
    IceConnectionChange(IceConnectionState),
    /// Unrecoverable engine fault.
    Error(String),
}

/// Contract between the coordinator and the native media engine.
///
/// The engine handle is owned exclusively by one coordinator; no other
/// component keeps a live reference after disposal. Teardown is split into
/// its four steps so the coordinator controls the release order: capture
/// stops first, then media sources, then the connection, then the factory.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Initialize the engine factory. Called once, before anything else.
    async fn create_factory(&mut self) -> Result<(), EngineError>;

    /// Create the peer connection with the resolved ICE server set.
    async fn create_connection(&mut self, ice_servers: &[IceServer]) -> Result<(), EngineError>;

    /// Produce the local offer.
    async fn create_offer(&mut self) -> Result<SessionDescription, EngineError>;

    /// Produce the local answer.
    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError>;

    /// Apply the local description.
    async fn set_local_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), EngineError>;

    /// Apply the remote description.
    async fn set_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), EngineError>;

    /// Hand one remote candidate to the engine.
    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Withdraw remote candidates previously handed to the engine.
    async fn remove_ice_candidates(
        &mut self,
        candidates: &[IceCandidate],
    ) -> Result<(), EngineError>;

    /// Take the engine event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>>;

    /// Stop outgoing media capture.
    async fn stop_capture(&mut self);

    /// Release local media source objects.
    async fn dispose_sources(&mut self);

    /// Release the peer connection.
    async fn dispose_connection(&mut self);

    /// Release the engine factory.
    async fn dispose_factory(&mut self);
}

/// Inert engine for demos and wiring checks.
///
/// Produces placeholder descriptions and reports ICE connected as soon as
/// both descriptions are in place. It performs no media work at all.
pub struct NullEngine {
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Option<mpsc::Receiver<EngineEvent>>,
    local_set: bool,
    remote_set: bool,
}

impl NullEngine {
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        Self {
            events_tx,
            events_rx: Some(events_rx),
            local_set: false,
            remote_set: false,
        }
    }

    fn placeholder_sdp() -> String {
        [
            "v=0",
            "o=- 0 0 IN IP4 127.0.0.1",
            "s=-",
            "t=0 0",
            "m=audio 9 UDP/TLS/RTP/SAVPF 111",
            "a=rtpmap:111 opus/48000/2",
        ]
        .join("\r\n")
            + "\r\n"
    }

    async fn maybe_report_connected(&mut self) {
        if self.local_set && self.remote_set {
            let _ = self
                .events_tx
                .send(EngineEvent::IceConnectionChange(IceConnectionState::Connected))
                .await;
        }
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for NullEngine {
    async fn create_factory(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create_connection(&mut self, _ice_servers: &[IceServer]) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, EngineError> {
        Ok(SessionDescription::new(
            signaling_protocol::SdpType::Offer,
            Self::placeholder_sdp(),
        ))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError> {
        Ok(SessionDescription::new(
            signaling_protocol::SdpType::Answer,
            Self::placeholder_sdp(),
        ))
    }

    async fn set_local_description(
        &mut self,
        _desc: &SessionDescription,
    ) -> Result<(), EngineError> {
        self.local_set = true;
        self.maybe_report_connected().await;
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        _desc: &SessionDescription,
    ) -> Result<(), EngineError> {
        self.remote_set = true;
        self.maybe_report_connected().await;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, _candidate: &IceCandidate) -> Result<(), EngineError> {
        Ok(())
    }

    async fn remove_ice_candidates(
        &mut self,
        _candidates: &[IceCandidate],
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events_rx.take()
    }

    async fn stop_capture(&mut self) {}

    async fn dispose_sources(&mut self) {}

    async fn dispose_connection(&mut self) {}

    async fn dispose_factory(&mut self) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use signaling_protocol::SdpType;

    #[tokio::test]
    async fn test_null_engine_round_trip() {
        let mut engine = NullEngine::new();
        let mut events = engine.take_events().unwrap();
        assert!(engine.take_events().is_none());

        engine.create_factory().await.unwrap();
        engine.create_connection(&[]).await.unwrap();

        let offer = engine.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);

        engine.set_local_description(&offer).await.unwrap();
        let answer = offer.relabel(SdpType::Answer);
        engine.set_remote_description(&answer).await.unwrap();

        match events.recv().await.unwrap() {
            EngineEvent::IceConnectionChange(IceConnectionState::Connected) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
