//! Media engine double.
//!
//! Records every trait call in order and returns scripted results, so
//! tests can assert exactly what reached the engine and when. The probe
//! half stays with the test: it reads the call log and injects engine
//! events (candidates, ICE state changes, faults).

use async_trait::async_trait;
use session_controller::engine::{EngineError, EngineEvent, MediaEngine, ENGINE_EVENT_BUFFER};
use signaling_protocol::room::IceServer;
use signaling_protocol::{IceCandidate, SdpType, SessionDescription};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateFactory,
    CreateConnection { ice_servers: usize },
    CreateOffer,
    CreateAnswer,
    SetLocalDescription { kind: SdpType },
    SetRemoteDescription { kind: SdpType, sdp: String },
    AddIceCandidate { candidate: String },
    RemoveIceCandidates { candidates: Vec<String> },
    StopCapture,
    DisposeSources,
    DisposeConnection,
    DisposeFactory,
}

/// Test-side handle to a [`ScriptedEngine`].
#[derive(Clone)]
pub struct EngineProbe {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    events_tx: mpsc::Sender<EngineEvent>,
}

impl EngineProbe {
    /// Snapshot of every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The candidate strings handed to the engine, in order.
    #[must_use]
    pub fn candidate_adds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::AddIceCandidate { candidate } => Some(candidate),
                _ => None,
            })
            .collect()
    }

    /// How many times a native create (offer or answer) ran.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::CreateOffer | EngineCall::CreateAnswer))
            .count()
    }

    /// The teardown calls in the order the coordinator issued them.
    #[must_use]
    pub fn dispose_order(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    EngineCall::StopCapture
                        | EngineCall::DisposeSources
                        | EngineCall::DisposeConnection
                        | EngineCall::DisposeFactory
                )
            })
            .collect()
    }

    /// Inject an engine event into the coordinator.
    pub async fn push_event(&self, event: EngineEvent) {
        self.events_tx
            .send(event)
            .await
            .expect("coordinator should be listening for engine events");
    }
}

/// Scripted [`MediaEngine`] implementation.
pub struct ScriptedEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    events_rx: Option<mpsc::Receiver<EngineEvent>>,
    offer_sdp: String,
    answer_sdp: String,
    fail_create_offer: Option<String>,
    fail_set_remote: Option<String>,
}

impl ScriptedEngine {
    /// Build an engine and its probe.
    #[must_use]
    pub fn new() -> (Self, EngineProbe) {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = Self {
            calls: Arc::clone(&calls),
            events_rx: Some(events_rx),
            offer_sdp: default_sdp(),
            answer_sdp: default_sdp(),
            fail_create_offer: None,
            fail_set_remote: None,
        };
        let probe = EngineProbe { calls, events_tx };
        (engine, probe)
    }

    /// Use a specific SDP text for created offers.
    #[must_use]
    pub fn with_offer_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.offer_sdp = sdp.into();
        self
    }

    /// Use a specific SDP text for created answers.
    #[must_use]
    pub fn with_answer_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.answer_sdp = sdp.into();
        self
    }

    /// Make offer creation fail with `reason`.
    #[must_use]
    pub fn failing_create_offer(mut self, reason: impl Into<String>) -> Self {
        self.fail_create_offer = Some(reason.into());
        self
    }

    /// Make remote description application fail with `reason`.
    #[must_use]
    pub fn failing_set_remote(mut self, reason: impl Into<String>) -> Self {
        self.fail_set_remote = Some(reason.into());
        self
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn default_sdp() -> String {
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

#[async_trait]
impl MediaEngine for ScriptedEngine {
    async fn create_factory(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::CreateFactory);
        Ok(())
    }

    async fn create_connection(&mut self, ice_servers: &[IceServer]) -> Result<(), EngineError> {
        self.record(EngineCall::CreateConnection {
            ice_servers: ice_servers.len(),
        });
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateOffer);
        if let Some(reason) = &self.fail_create_offer {
            return Err(EngineError::new(reason.clone()));
        }
        Ok(SessionDescription::new(SdpType::Offer, self.offer_sdp.clone()))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::new(
            SdpType::Answer,
            self.answer_sdp.clone(),
        ))
    }

    async fn set_local_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::SetLocalDescription { kind: desc.kind });
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::SetRemoteDescription {
            kind: desc.kind,
            sdp: desc.sdp.clone(),
        });
        if let Some(reason) = &self.fail_set_remote {
            return Err(EngineError::new(reason.clone()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        self.record(EngineCall::AddIceCandidate {
            candidate: candidate.candidate.clone(),
        });
        Ok(())
    }

    async fn remove_ice_candidates(
        &mut self,
        candidates: &[IceCandidate],
    ) -> Result<(), EngineError> {
        self.record(EngineCall::RemoveIceCandidates {
            candidates: candidates.iter().map(|c| c.candidate.clone()).collect(),
        });
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events_rx.take()
    }

    async fn stop_capture(&mut self) {
        self.record(EngineCall::StopCapture);
    }

    async fn dispose_sources(&mut self) {
        self.record(EngineCall::DisposeSources);
    }

    async fn dispose_connection(&mut self) {
        self.record(EngineCall::DisposeConnection);
    }

    async fn dispose_factory(&mut self) {
        self.record(EngineCall::DisposeFactory);
    }
}
