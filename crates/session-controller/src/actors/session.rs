//! `SessionActor` - the signaling session state machine.
//!
//! One actor per call. It resolves the room, connects and registers the
//! relay channel, then translates in both directions: every inbound
//! signaling message becomes exactly one coordinator call, and every
//! coordinator event (local description ready, local candidate gathered)
//! becomes an outbound signaling message.
//!
//! # Candidate routing
//!
//! Outbound routing is role-based: the initiator posts through the room
//! relay's HTTP route, because only the initiating side has an HTTP relay
//! endpoint bound to the session before full registration; the answerer
//! sends over the live channel.
//!
//! # Loopback
//!
//! Loopback is a test-harness mode: the local offer is routed back to the
//! coordinator renamed as a remote answer, and local candidate adds and
//! removals echo back symmetrically. A loopback join that is not the
//! initiator, or that finds an offer already queued, means the room is
//! occupied and is reported as an error.

use crate::channel::{ChannelClient, ChannelInbound};
use crate::config::SessionConfig;
use crate::engine::MediaEngine;
use crate::errors::SessionError;
use crate::room::RoomClient;
use crate::transport::{SignalingTransport, TransportConnector, TransportEvent};

use super::coordinator::{CoordinatorActor, CoordinatorHandle};
use super::messages::{
    ConnectionState, CoordinatorEvent, SessionCommand, SessionEvent, EVENT_CHANNEL_BUFFER,
    SESSION_CHANNEL_BUFFER,
};

use signaling_protocol::{
    IceCandidate, ProtocolError, SdpType, SessionDescription, SignalingMessage,
    SignalingParameters,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Completions of off-actor I/O, posted back into the actor mailbox.
enum IoCompletion {
    Resolved(Result<SignalingParameters, SessionError>),
    TransportConnected(Result<Box<dyn SignalingTransport>, SessionError>),
    RelayPostFailed(SessionError),
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// Disconnect the session and wait for teardown to finish.
    ///
    /// # Errors
    ///
    /// Returns an error when the session already stopped.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Disconnect { respond_to: tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    config: SessionConfig,
    receiver: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::Sender<SessionEvent>,
    io_tx: mpsc::Sender<IoCompletion>,
    io_rx: mpsc::Receiver<IoCompletion>,
    cancel_token: CancellationToken,
    connector: Arc<dyn TransportConnector>,
    room_client: RoomClient,
    coordinator: CoordinatorHandle,
    coordinator_events: mpsc::Receiver<CoordinatorEvent>,
    channel: Option<ChannelClient>,
    params: Option<SignalingParameters>,
    state: ConnectionState,
    error_reported: bool,
}

impl SessionActor {
    /// Spawn a session: resolves the room, negotiates, reports events.
    ///
    /// The engine handle is owned by the session's coordinator from here
    /// on; the caller keeps no live reference.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine's event stream was already taken.
    pub fn spawn(
        config: SessionConfig,
        engine: Box<dyn MediaEngine>,
        connector: Arc<dyn TransportConnector>,
        room_client: RoomClient,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>), SessionError> {
        let cancel_token = CancellationToken::new();
        let (coordinator, coordinator_events, _coordinator_task) = CoordinatorActor::spawn(
            engine,
            config.media.clone(),
            cancel_token.child_token(),
        )?;

        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (io_tx, io_rx) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            config,
            receiver,
            events_tx,
            io_tx,
            io_rx,
            cancel_token: cancel_token.clone(),
            connector,
            room_client,
            coordinator,
            coordinator_events,
            channel: None,
            params: None,
            state: ConnectionState::New,
            error_reported: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
        };

        Ok((handle, events_rx, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "session.signaling",
        fields(room_id = %self.config.room.room_id, loopback = self.config.room.loopback)
    )]
    async fn run(mut self) {
        debug!(target: "session.signaling", "SessionActor started");

        // The factory can initialize while the room lookup is in flight.
        let _ = self.coordinator.create_factory().await;
        self.start_room_resolution();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "session.signaling", "Cancellation received");
                    self.disconnect_internal().await;
                    break;
                }

                command = self.receiver.recv() => {
                    match command {
                        Some(SessionCommand::Disconnect { respond_to }) => {
                            self.disconnect_internal().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        None => {
                            debug!(target: "session.signaling", "Handle dropped, tearing down");
                            self.disconnect_internal().await;
                            break;
                        }
                    }
                }

                completion = self.io_rx.recv() => {
                    if let Some(completion) = completion {
                        self.handle_io_completion(completion).await;
                    }
                }

                // Pends forever while no channel is connected.
                event = Self::channel_recv(&mut self.channel) => {
                    match event {
                        Some(event) => {
                            if self.handle_transport_event(event).await {
                                break;
                            }
                        }
                        None => self.channel = None,
                    }
                }

                event = self.coordinator_events.recv() => {
                    match event {
                        Some(event) => self.handle_coordinator_event(event).await,
                        None => {
                            debug!(target: "session.signaling", "Coordinator gone");
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "session.signaling", state = ?self.state, "SessionActor stopped");
    }

    async fn channel_recv(channel: &mut Option<ChannelClient>) -> Option<TransportEvent> {
        match channel.as_mut() {
            Some(channel) => channel.recv().await,
            None => std::future::pending().await,
        }
    }

    // -- Connect flow -------------------------------------------------------

    fn start_room_resolution(&self) {
        let client = self.room_client.clone();
        let room = self.config.room.clone();
        let io_tx = self.io_tx.clone();
        tokio::spawn(async move {
            let result = client.resolve(&room.room_url, &room.room_id).await;
            let _ = io_tx.send(IoCompletion::Resolved(result)).await;
        });
    }

    async fn handle_io_completion(&mut self, completion: IoCompletion) {
        match completion {
            IoCompletion::Resolved(Ok(params)) => self.on_room_resolved(params).await,
            IoCompletion::Resolved(Err(e))
            | IoCompletion::TransportConnected(Err(e))
            | IoCompletion::RelayPostFailed(e) => self.report_error(e).await,
            IoCompletion::TransportConnected(Ok(transport)) => {
                self.on_transport_connected(transport).await;
            }
        }
    }

    async fn on_room_resolved(&mut self, params: SignalingParameters) {
        if self.state != ConnectionState::New {
            debug!(target: "session.signaling", state = ?self.state, "Late room resolution dropped");
            return;
        }

        // A loopback session dials its own room; finding it taken, or being
        // handed the answering role, means someone else is in it.
        if self.config.room.loopback && (!params.initiator || params.offer_sdp.is_some()) {
            self.report_error(SessionError::Protocol("Loopback room is busy.".to_string()))
                .await;
            return;
        }

        info!(
            target: "session.signaling",
            client_id = %params.client_id,
            initiator = params.initiator,
            "Room resolved, connecting channel"
        );
        let wss_url = params.wss_url.clone();
        self.params = Some(params);

        let connector = Arc::clone(&self.connector);
        let io_tx = self.io_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&wss_url).await;
            let _ = io_tx.send(IoCompletion::TransportConnected(result)).await;
        });
    }

    async fn on_transport_connected(&mut self, transport: Box<dyn SignalingTransport>) {
        if self.state != ConnectionState::New {
            debug!(target: "session.signaling", state = ?self.state, "Late transport connect dropped");
            return;
        }
        let Some(params) = self.params.clone() else {
            self.report_error(SessionError::Channel(
                "Transport connected without room parameters".to_string(),
            ))
            .await;
            return;
        };

        let mut channel = match ChannelClient::new(transport, self.config.channel_close_timeout) {
            Ok(channel) => channel,
            Err(e) => {
                self.report_error(e).await;
                return;
            }
        };
        if let Err(e) = channel.register(&params.room_id, &params.client_id).await {
            self.report_error(e).await;
            return;
        }
        self.channel = Some(channel);
        self.state = ConnectionState::Connected;
        self.emit(SessionEvent::ConnectedToRoom(Box::new(params.clone())))
            .await;

        let _ = self
            .coordinator
            .create_connection(params.ice_servers.clone())
            .await;

        if params.initiator {
            debug!(target: "session.signaling", "Creating offer");
            let _ = self.coordinator.create_offer().await;
        } else {
            if let Some(offer) = params.offer_sdp {
                debug!(target: "session.signaling", "Applying backlog offer, creating answer");
                let _ = self.coordinator.set_remote_description(offer).await;
                let _ = self.coordinator.create_answer().await;
            }
            for candidate in params.ice_candidates {
                let _ = self.coordinator.add_remote_candidate(candidate).await;
            }
        }
    }

    // -- Inbound ------------------------------------------------------------

    /// Handle a raw transport event. Returns true if the actor should exit.
    async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        let Some(inbound) = channel.handle_event(event) else {
            return false;
        };
        match inbound {
            ChannelInbound::Payload(text) => self.handle_signaling_payload(&text).await,
            ChannelInbound::RelayError(e) => {
                self.report_error(SessionError::Channel(format!("Relay error: {e}")))
                    .await;
                false
            }
            ChannelInbound::Closed => {
                if self.state == ConnectionState::Closed {
                    false
                } else {
                    info!(target: "session.signaling", "Channel closed by remote");
                    self.emit(SessionEvent::RemoteHangup).await;
                    self.disconnect_internal().await;
                    true
                }
            }
            ChannelInbound::Fault(e) => {
                self.report_error(SessionError::Channel(e)).await;
                false
            }
        }
    }

    /// Translate one inbound application message into exactly one
    /// coordinator entry point. Returns true if the actor should exit.
    async fn handle_signaling_payload(&mut self, text: &str) -> bool {
        let initiator = self.params.as_ref().is_some_and(|p| p.initiator);
        let message = match SignalingMessage::from_json(text) {
            Ok(message) => message,
            Err(ProtocolError::UnknownType(t)) => {
                self.report_error(SessionError::Protocol(format!(
                    "Unexpected signaling message type: {t}"
                )))
                .await;
                return false;
            }
            Err(ProtocolError::Malformed(e)) => {
                self.report_error(SessionError::Channel(format!(
                    "Malformed signaling message: {e}"
                )))
                .await;
                return false;
            }
        };

        match message {
            SignalingMessage::Offer { sdp } => {
                if initiator {
                    self.report_error(SessionError::Protocol(
                        "Received offer as the initiating peer".to_string(),
                    ))
                    .await;
                } else {
                    let offer = SessionDescription::new(SdpType::Offer, sdp);
                    let _ = self.coordinator.set_remote_description(offer).await;
                    let _ = self.coordinator.create_answer().await;
                }
            }
            SignalingMessage::Answer { sdp } => {
                if initiator {
                    let answer = SessionDescription::new(SdpType::Answer, sdp);
                    let _ = self.coordinator.set_remote_description(answer).await;
                } else {
                    self.report_error(SessionError::Protocol(
                        "Received answer as the answering peer".to_string(),
                    ))
                    .await;
                }
            }
            SignalingMessage::Candidate {
                label,
                id,
                candidate,
            } => {
                let _ = self
                    .coordinator
                    .add_remote_candidate(IceCandidate::new(id, label, candidate))
                    .await;
            }
            SignalingMessage::RemoveCandidates { candidates } => {
                let removals = candidates.into_iter().map(IceCandidate::from).collect();
                let _ = self.coordinator.remove_remote_candidates(removals).await;
            }
            SignalingMessage::Bye => {
                info!(target: "session.signaling", "Remote hangup");
                self.emit(SessionEvent::RemoteHangup).await;
                self.disconnect_internal().await;
                return true;
            }
        }
        false
    }

    // -- Outbound -----------------------------------------------------------

    async fn handle_coordinator_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::LocalDescription(desc) => self.send_local_description(desc).await,
            CoordinatorEvent::LocalCandidate(candidate) => {
                self.send_local_candidate(candidate).await;
            }
            CoordinatorEvent::LocalCandidatesRemoved(candidates) => {
                self.send_local_candidate_removals(candidates).await;
            }
            CoordinatorEvent::IceConnected => self.emit(SessionEvent::IceConnected).await,
            CoordinatorEvent::IceDisconnected => self.emit(SessionEvent::IceDisconnected).await,
            CoordinatorEvent::Closed => {
                debug!(target: "session.signaling", "Coordinator reported closed");
            }
            CoordinatorEvent::Error(message) => {
                self.report_error(SessionError::Engine(message)).await;
            }
        }
    }

    async fn send_local_description(&mut self, desc: SessionDescription) {
        let initiator = self.params.as_ref().is_some_and(|p| p.initiator);
        debug!(target: "session.signaling", kind = desc.kind.as_str(), "Sending local description");

        if initiator {
            if self.state != ConnectionState::Connected {
                self.report_error(SessionError::Protocol(
                    "Sending offer SDP in non connected state.".to_string(),
                ))
                .await;
                return;
            }
            self.relay_post(SignalingMessage::from_description(&desc)).await;
            if self.config.room.loopback {
                // The harness answers itself with its own offer text.
                let echo = desc.relabel(SdpType::Answer);
                let _ = self.coordinator.set_remote_description(echo).await;
            }
        } else if self.config.room.loopback {
            self.report_error(SessionError::Protocol(
                "Sending answer in loopback mode.".to_string(),
            ))
            .await;
        } else {
            self.channel_send(SignalingMessage::from_description(&desc))
                .await;
        }
    }

    async fn send_local_candidate(&mut self, candidate: IceCandidate) {
        let initiator = self.params.as_ref().is_some_and(|p| p.initiator);
        if initiator {
            if self.state != ConnectionState::Connected {
                self.report_error(SessionError::Protocol(
                    "Sending ICE candidate in non connected state.".to_string(),
                ))
                .await;
                return;
            }
            self.relay_post(SignalingMessage::from_candidate(&candidate)).await;
            if self.config.room.loopback {
                let _ = self.coordinator.add_remote_candidate(candidate).await;
            }
        } else {
            self.channel_send(SignalingMessage::from_candidate(&candidate))
                .await;
        }
    }

    async fn send_local_candidate_removals(&mut self, candidates: Vec<IceCandidate>) {
        let initiator = self.params.as_ref().is_some_and(|p| p.initiator);
        if initiator {
            if self.state != ConnectionState::Connected {
                self.report_error(SessionError::Protocol(
                    "Sending ICE candidate removals in non connected state.".to_string(),
                ))
                .await;
                return;
            }
            self.relay_post(SignalingMessage::from_removals(&candidates)).await;
            if self.config.room.loopback {
                let _ = self.coordinator.remove_remote_candidates(candidates).await;
            }
        } else {
            self.channel_send(SignalingMessage::from_removals(&candidates))
                .await;
        }
    }

    /// Post a message through the room relay's HTTP route (initiator side).
    async fn relay_post(&mut self, message: SignalingMessage) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.report_error(SessionError::Channel(e.to_string())).await;
                return;
            }
        };
        let Some(params) = self.params.as_ref() else {
            return;
        };
        let client = self.room_client.clone();
        let room_url = self.config.room.room_url.clone();
        let room_id = params.room_id.clone();
        let client_id = params.client_id.clone();
        let io_tx = self.io_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = client
                .send_message(&room_url, &room_id, &client_id, payload)
                .await
            {
                let _ = io_tx.send(IoCompletion::RelayPostFailed(e)).await;
            }
        });
    }

    /// Send a message over the live channel (answerer side).
    async fn channel_send(&mut self, message: SignalingMessage) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.report_error(SessionError::Channel(e.to_string())).await;
                return;
            }
        };
        let Some(channel) = self.channel.as_mut() else {
            warn!(target: "session.signaling", "Send without a channel dropped");
            return;
        };
        if let Err(e) = channel.send(payload).await {
            self.report_error(e).await;
        }
    }

    // -- Teardown and errors ------------------------------------------------

    async fn disconnect_internal(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let was_connected = self.state == ConnectionState::Connected;
        debug!(target: "session.signaling", "Disconnecting");

        // The initiator also tells the directory it is leaving; the
        // answerer's bye goes out with the channel close below.
        if was_connected {
            if let Some(params) = self.params.as_ref() {
                if params.initiator {
                    let client = self.room_client.clone();
                    let room_url = self.config.room.room_url.clone();
                    let room_id = params.room_id.clone();
                    let client_id = params.client_id.clone();
                    tokio::spawn(async move {
                        client.leave(&room_url, &room_id, &client_id).await;
                    });
                }
            }
        }

        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        if let Err(e) = self.coordinator.close().await {
            debug!(target: "session.signaling", error = %e, "Coordinator already gone");
        }

        self.state = ConnectionState::Closed;
        self.emit(SessionEvent::Closed).await;
        info!(target: "session.signaling", "Disconnected");
    }

    /// Funnel for every error path: transitions to `Error` exactly once and
    /// notifies the application exactly once per session. The transport is
    /// not closed here; the owner decides when to disconnect.
    async fn report_error(&mut self, error: SessionError) {
        warn!(target: "session.signaling", error = %error, "Session error");
        if self.error_reported || self.state == ConnectionState::Closed {
            debug!(target: "session.signaling", "Further error suppressed");
            return;
        }
        self.error_reported = true;
        self.state = ConnectionState::Error;
        self.emit(SessionEvent::Error {
            kind: error.kind(),
            message: error.message(),
        })
        .await;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!(target: "session.signaling", "Event receiver gone");
        }
    }
}
