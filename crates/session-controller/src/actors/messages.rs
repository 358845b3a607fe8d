//! Message and state types shared by the session and coordinator actors.

use crate::errors::ErrorKind;
use signaling_protocol::room::IceServer;
use signaling_protocol::{IceCandidate, SessionDescription, SignalingParameters};
use tokio::sync::oneshot;

/// Mailbox size for the session actor.
pub const SESSION_CHANNEL_BUFFER: usize = 200;

/// Mailbox size for the coordinator actor.
pub const COORDINATOR_CHANNEL_BUFFER: usize = 200;

/// Buffer size for event streams handed to the application.
pub const EVENT_CHANNEL_BUFFER: usize = 200;

/// Signaling session lifecycle.
///
/// `Error` is absorbing: exactly one terminal-failure report is made per
/// session, further errors are suppressed. `Error` does not close the
/// transport by itself; the owner still calls disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connected,
    Closed,
    Error,
}

/// Commands the application posts to a session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Tear the session down: bye/leave signaling, bounded channel close,
    /// ordered engine disposal.
    Disconnect { respond_to: oneshot::Sender<()> },
}

/// Events a session reports to its owning application.
#[derive(Debug)]
pub enum SessionEvent {
    /// Room resolved and the channel registered; negotiation is starting.
    ConnectedToRoom(Box<SignalingParameters>),
    /// The engine reports ICE connectivity established.
    IceConnected,
    /// The engine reports ICE connectivity lost.
    IceDisconnected,
    /// The remote side signaled closure (`bye` or channel close).
    RemoteHangup,
    /// The session finished tearing down.
    Closed,
    /// Terminal failure. Fired at most once per session.
    Error { kind: ErrorKind, message: String },
}

/// Commands the session posts to the peer connection coordinator.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Initialize the engine factory.
    CreateFactory,
    /// Create the peer connection with the resolved ICE server set.
    CreateConnection { ice_servers: Vec<IceServer> },
    /// Create the local offer; valid once, initiator only.
    CreateOffer,
    /// Create the local answer; valid once, answerer only.
    CreateAnswer,
    /// Apply a remote description (after local codec/bitrate rewriting).
    SetRemoteDescription(SessionDescription),
    /// Buffer or forward one remote candidate.
    AddRemoteCandidate(IceCandidate),
    /// Withdraw remote candidates, draining the buffer first.
    RemoveRemoteCandidates(Vec<IceCandidate>),
    /// Release engine resources in fixed order. Idempotent.
    Close { respond_to: oneshot::Sender<()> },
}

/// Events the coordinator reports back to the session.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Local description created and applied; ready to signal out.
    LocalDescription(SessionDescription),
    /// The engine gathered a local candidate to signal out.
    LocalCandidate(IceCandidate),
    /// The engine withdrew local candidates; signal the removal out.
    LocalCandidatesRemoved(Vec<IceCandidate>),
    /// ICE connectivity established.
    IceConnected,
    /// ICE connectivity lost.
    IceDisconnected,
    /// Engine resources released.
    Closed,
    /// Engine-side failure. Fired at most once per coordinator.
    Error(String),
}

/// Peer connection lifecycle as the coordinator tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoordinatorState {
    Uninitialized,
    FactoryReady,
    ConnectionReady,
    Negotiating,
    Active,
    Closed,
}

/// Remote candidate buffering stage.
///
/// Candidates buffer until both descriptions are applied, then the queue
/// drains FIFO exactly once and every later candidate goes straight to the
/// engine. The drained stage is explicit so the one-shot invariant is a
/// type-level fact rather than a nulled-out sentinel.
#[derive(Debug)]
pub enum CandidateStage {
    Buffering(Vec<IceCandidate>),
    Drained,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_state_ordering() {
        assert!(CoordinatorState::Uninitialized < CoordinatorState::FactoryReady);
        assert!(CoordinatorState::FactoryReady < CoordinatorState::ConnectionReady);
        assert!(CoordinatorState::ConnectionReady < CoordinatorState::Negotiating);
        assert!(CoordinatorState::Negotiating < CoordinatorState::Active);
        assert!(CoordinatorState::Active < CoordinatorState::Closed);
    }

    #[test]
    fn test_candidate_stage_starts_buffering() {
        let stage = CandidateStage::Buffering(Vec::new());
        assert!(matches!(stage, CandidateStage::Buffering(q) if q.is_empty()));
    }
}
