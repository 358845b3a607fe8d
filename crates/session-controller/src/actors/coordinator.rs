//! `CoordinatorActor` - owns the peer connection for one session.
//!
//! The coordinator serializes every mutating operation on the media engine
//! onto its own task: commands arrive through the mailbox, engine events
//! through the engine's event stream, and nothing else touches the engine
//! handle. Thread affinity is a property of this structure, not a runtime
//! assertion.
//!
//! # Candidate buffering
//!
//! Remote candidates buffer until both descriptions are applied. The drain
//! point differs by role: the initiator drains after applying the remote
//! answer, the answerer after applying its own local answer, because that
//! is the moment the second description lands in each flow. The queue
//! drains FIFO exactly once and is never refilled.

use crate::config::MediaConfig;
use crate::engine::{EngineEvent, IceConnectionState, MediaEngine};
use crate::errors::SessionError;
use crate::sdp::{self, MediaKind};

use super::messages::{
    CandidateStage, CoordinatorCommand, CoordinatorEvent, CoordinatorState,
    COORDINATOR_CHANNEL_BUFFER, EVENT_CHANNEL_BUFFER,
};

use signaling_protocol::room::IceServer;
use signaling_protocol::{IceCandidate, SessionDescription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to a `CoordinatorActor`.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    async fn post(&self, command: CoordinatorCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Initialize the engine factory.
    pub async fn create_factory(&self) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::CreateFactory).await
    }

    /// Create the peer connection with the resolved ICE servers.
    pub async fn create_connection(
        &self,
        ice_servers: Vec<IceServer>,
    ) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::CreateConnection { ice_servers })
            .await
    }

    /// Create the local offer.
    pub async fn create_offer(&self) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::CreateOffer).await
    }

    /// Create the local answer.
    pub async fn create_answer(&self) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::CreateAnswer).await
    }

    /// Apply a remote description.
    pub async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::SetRemoteDescription(desc))
            .await
    }

    /// Buffer or forward one remote candidate.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::AddRemoteCandidate(candidate))
            .await
    }

    /// Withdraw remote candidates.
    pub async fn remove_remote_candidates(
        &self,
        candidates: Vec<IceCandidate>,
    ) -> Result<(), SessionError> {
        self.post(CoordinatorCommand::RemoveRemoteCandidates(candidates))
            .await
    }

    /// Release engine resources and stop the actor. Waits for the release
    /// to finish. Idempotent: closing a closed coordinator is a no-op.
    pub async fn close(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.post(CoordinatorCommand::Close { respond_to: tx })
            .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Cancel the coordinator actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    engine: Box<dyn MediaEngine>,
    engine_events: mpsc::Receiver<EngineEvent>,
    receiver: mpsc::Receiver<CoordinatorCommand>,
    events_tx: mpsc::Sender<CoordinatorEvent>,
    cancel_token: CancellationToken,
    media: MediaConfig,
    state: CoordinatorState,
    candidates: CandidateStage,
    is_initiator: bool,
    local_description: Option<SessionDescription>,
    remote_description_set: bool,
    is_error: bool,
}

impl CoordinatorActor {
    /// Spawn a coordinator owning `engine`.
    ///
    /// Returns the handle, the coordinator event stream and the task join
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine's event stream was already taken.
    pub fn spawn(
        mut engine: Box<dyn MediaEngine>,
        media: MediaConfig,
        cancel_token: CancellationToken,
    ) -> Result<
        (
            CoordinatorHandle,
            mpsc::Receiver<CoordinatorEvent>,
            JoinHandle<()>,
        ),
        SessionError,
    > {
        let engine_events = engine.take_events().ok_or_else(|| {
            SessionError::Engine("Engine event stream already taken".to_string())
        })?;
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);

        let actor = Self {
            engine,
            engine_events,
            receiver,
            events_tx,
            cancel_token: cancel_token.clone(),
            media,
            state: CoordinatorState::Uninitialized,
            candidates: CandidateStage::Buffering(Vec::new()),
            is_initiator: false,
            local_description: None,
            remote_description_set: false,
            is_error: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CoordinatorHandle {
            sender,
            cancel_token,
        };

        Ok((handle, events_rx, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "session.coordinator")]
    async fn run(mut self) {
        debug!(target: "session.coordinator", "CoordinatorActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "session.coordinator", "Cancellation received");
                    self.close_internal().await;
                    break;
                }

                command = self.receiver.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            debug!(target: "session.coordinator", "Mailbox closed, exiting");
                            self.close_internal().await;
                            break;
                        }
                    }
                }

                event = self.engine_events.recv() => {
                    match event {
                        Some(event) => self.handle_engine_event(event).await,
                        None => {
                            debug!(target: "session.coordinator", "Engine event stream ended");
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "session.coordinator", state = ?self.state, "CoordinatorActor stopped");
    }

    /// Handle a single command. Returns true if the actor should exit.
    async fn handle_command(&mut self, command: CoordinatorCommand) -> bool {
        if self.state == CoordinatorState::Closed
            && !matches!(command, CoordinatorCommand::Close { .. })
        {
            debug!(target: "session.coordinator", command = ?command, "Dropped after close");
            return false;
        }

        match command {
            CoordinatorCommand::CreateFactory => {
                self.handle_create_factory().await;
                false
            }
            CoordinatorCommand::CreateConnection { ice_servers } => {
                self.handle_create_connection(ice_servers).await;
                false
            }
            CoordinatorCommand::CreateOffer => {
                self.handle_create_local_description(true).await;
                false
            }
            CoordinatorCommand::CreateAnswer => {
                self.handle_create_local_description(false).await;
                false
            }
            CoordinatorCommand::SetRemoteDescription(desc) => {
                self.handle_set_remote_description(desc).await;
                false
            }
            CoordinatorCommand::AddRemoteCandidate(candidate) => {
                self.handle_add_remote_candidate(candidate).await;
                false
            }
            CoordinatorCommand::RemoveRemoteCandidates(candidates) => {
                self.handle_remove_remote_candidates(candidates).await;
                false
            }
            CoordinatorCommand::Close { respond_to } => {
                // Stays alive to absorb late posts as fast no-ops; the
                // actor exits when the session drops the handle or cancels.
                self.close_internal().await;
                let _ = respond_to.send(());
                false
            }
        }
    }

    async fn handle_create_factory(&mut self) {
        if self.is_error || self.state != CoordinatorState::Uninitialized {
            warn!(target: "session.coordinator", state = ?self.state, "Factory create skipped");
            return;
        }
        match self.engine.create_factory().await {
            Ok(()) => {
                self.state = CoordinatorState::FactoryReady;
                debug!(target: "session.coordinator", "Engine factory created");
            }
            Err(e) => self.report_error(format!("Failed to create factory: {e}")).await,
        }
    }

    async fn handle_create_connection(&mut self, ice_servers: Vec<IceServer>) {
        if self.is_error || self.state != CoordinatorState::FactoryReady {
            warn!(target: "session.coordinator", state = ?self.state, "Connection create skipped");
            return;
        }
        match self.engine.create_connection(&ice_servers).await {
            Ok(()) => {
                self.state = CoordinatorState::ConnectionReady;
                debug!(
                    target: "session.coordinator",
                    ice_servers = ice_servers.len(),
                    "Peer connection created"
                );
            }
            Err(e) => {
                self.report_error(format!("Failed to create peer connection: {e}"))
                    .await;
            }
        }
    }

    /// Offer and answer creation share everything but the engine call and
    /// the drain point.
    async fn handle_create_local_description(&mut self, offer: bool) {
        if self.is_error || self.state < CoordinatorState::ConnectionReady {
            warn!(target: "session.coordinator", state = ?self.state, "SDP create skipped");
            return;
        }
        // A second creation is a signaling-protocol violation; the engine
        // must not even be asked.
        if self.local_description.is_some() {
            self.report_error("Multiple SDP create.".to_string()).await;
            return;
        }
        self.is_initiator = offer;

        debug!(target: "session.coordinator", offer = offer, "Creating local description");
        let created = if offer {
            self.engine.create_offer().await
        } else {
            self.engine.create_answer().await
        };
        let desc = match created {
            Ok(desc) => desc,
            Err(e) => {
                self.report_error(format!("Create SDP error: {e}")).await;
                return;
            }
        };

        let rewritten = SessionDescription::new(desc.kind, self.rewrite_local_sdp(&desc.sdp));
        self.local_description = Some(rewritten.clone());
        self.state = CoordinatorState::Negotiating;

        debug!(target: "session.coordinator", kind = rewritten.kind.as_str(), "Setting local description");
        if let Err(e) = self.engine.set_local_description(&rewritten).await {
            self.report_error(format!("Set SDP error: {e}")).await;
            return;
        }

        // Local description applied: signal it out. The answerer now has
        // both descriptions in place, so its buffered candidates drain here.
        self.emit(CoordinatorEvent::LocalDescription(rewritten)).await;
        if !self.is_initiator {
            self.drain_candidates().await;
        }
    }

    async fn handle_set_remote_description(&mut self, desc: SessionDescription) {
        if self.is_error || self.state < CoordinatorState::ConnectionReady {
            warn!(target: "session.coordinator", state = ?self.state, "Remote SDP skipped");
            return;
        }

        let rewritten = SessionDescription::new(desc.kind, self.rewrite_remote_sdp(&desc.sdp));
        debug!(target: "session.coordinator", kind = rewritten.kind.as_str(), "Setting remote description");
        if let Err(e) = self.engine.set_remote_description(&rewritten).await {
            self.report_error(format!("Set SDP error: {e}")).await;
            return;
        }
        self.remote_description_set = true;
        if self.state < CoordinatorState::Negotiating {
            self.state = CoordinatorState::Negotiating;
        }

        // The initiator applies the remote answer last; both descriptions
        // are now in place, so its buffered candidates drain here.
        if self.is_initiator && self.local_description.is_some() {
            self.drain_candidates().await;
        }
    }

    async fn handle_add_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.is_error || self.state < CoordinatorState::ConnectionReady {
            warn!(target: "session.coordinator", "Remote candidate dropped");
            return;
        }
        match &mut self.candidates {
            CandidateStage::Buffering(queue) => {
                queue.push(candidate);
            }
            CandidateStage::Drained => {
                if let Err(e) = self.engine.add_ice_candidate(&candidate).await {
                    warn!(target: "session.coordinator", error = %e, "Candidate rejected by engine");
                }
            }
        }
    }

    async fn handle_remove_remote_candidates(&mut self, candidates: Vec<IceCandidate>) {
        if self.is_error || self.state < CoordinatorState::ConnectionReady {
            warn!(target: "session.coordinator", "Candidate removal dropped");
            return;
        }
        // A removal may refer to a candidate still sitting in the buffer;
        // drain first so the engine observes the add before its removal.
        self.drain_candidates().await;
        if let Err(e) = self.engine.remove_ice_candidates(&candidates).await {
            warn!(target: "session.coordinator", error = %e, "Candidate removal rejected by engine");
        }
    }

    /// Apply the buffered candidates FIFO and switch to pass-through mode.
    async fn drain_candidates(&mut self) {
        let stage = std::mem::replace(&mut self.candidates, CandidateStage::Drained);
        if let CandidateStage::Buffering(queue) = stage {
            debug!(
                target: "session.coordinator",
                count = queue.len(),
                "Draining remote candidates"
            );
            for candidate in queue {
                if let Err(e) = self.engine.add_ice_candidate(&candidate).await {
                    warn!(target: "session.coordinator", error = %e, "Candidate rejected by engine");
                }
            }
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                self.emit(CoordinatorEvent::LocalCandidate(candidate)).await;
            }
            EngineEvent::LocalCandidatesRemoved(candidates) => {
                self.emit(CoordinatorEvent::LocalCandidatesRemoved(candidates))
                    .await;
            }
            EngineEvent::IceConnectionChange(state) => {
                debug!(target: "session.coordinator", ice_state = ?state, "ICE connection change");
                match state {
                    IceConnectionState::Connected => {
                        if self.state == CoordinatorState::Negotiating {
                            self.state = CoordinatorState::Active;
                        }
                        self.emit(CoordinatorEvent::IceConnected).await;
                    }
                    IceConnectionState::Disconnected => {
                        self.emit(CoordinatorEvent::IceDisconnected).await;
                    }
                    IceConnectionState::Failed => {
                        self.report_error("ICE connection failed.".to_string()).await;
                    }
                    _ => {}
                }
            }
            EngineEvent::Error(reason) => self.report_error(reason).await,
        }
    }

    /// Rewrite a locally created description: codec preferences only.
    fn rewrite_local_sdp(&self, text: &str) -> String {
        let mut sdp = text.to_string();
        if self.media.prefers_isac() {
            sdp = sdp::prefer_codec(&sdp, sdp::AUDIO_CODEC_ISAC, MediaKind::Audio);
        }
        if self.media.video_call_enabled {
            sdp = sdp::prefer_codec(&sdp, self.media.sdp_video_codec_name(), MediaKind::Video);
        }
        sdp
    }

    /// Rewrite an incoming remote description: codec preferences plus the
    /// configured starting bitrates.
    fn rewrite_remote_sdp(&self, text: &str) -> String {
        let mut sdp = text.to_string();
        if self.media.prefers_isac() {
            sdp = sdp::prefer_codec(&sdp, sdp::AUDIO_CODEC_ISAC, MediaKind::Audio);
        }
        if self.media.video_call_enabled {
            sdp = sdp::prefer_codec(&sdp, self.media.sdp_video_codec_name(), MediaKind::Video);
        }
        if self.media.audio_start_bitrate_kbps > 0 {
            sdp = sdp::set_start_bitrate(
                &sdp,
                sdp::AUDIO_CODEC_OPUS,
                MediaKind::Audio,
                self.media.audio_start_bitrate_kbps,
            );
        }
        if self.media.video_call_enabled && self.media.video_start_bitrate_kbps > 0 {
            sdp = sdp::set_start_bitrate(
                &sdp,
                self.media.sdp_video_codec_name(),
                MediaKind::Video,
                self.media.video_start_bitrate_kbps,
            );
        }
        sdp
    }

    /// Release engine resources in fixed order. Idempotent.
    async fn close_internal(&mut self) {
        if self.state == CoordinatorState::Closed {
            return;
        }
        debug!(target: "session.coordinator", "Closing peer connection");
        self.engine.stop_capture().await;
        self.engine.dispose_sources().await;
        self.engine.dispose_connection().await;
        self.engine.dispose_factory().await;
        self.state = CoordinatorState::Closed;
        self.candidates = CandidateStage::Drained;
        self.emit(CoordinatorEvent::Closed).await;
        debug!(target: "session.coordinator", "Peer connection closed");
    }

    /// Report an engine-side failure exactly once. Resources are released
    /// only on explicit close, never here.
    async fn report_error(&mut self, message: String) {
        warn!(target: "session.coordinator", error = %message, "Peer connection error");
        if self.is_error {
            debug!(target: "session.coordinator", "Further error suppressed");
            return;
        }
        self.is_error = true;
        self.emit(CoordinatorEvent::Error(message)).await;
    }

    async fn emit(&self, event: CoordinatorEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!(target: "session.coordinator", "Event receiver gone");
        }
    }
}
