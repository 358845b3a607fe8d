//! Session controller error types.
//!
//! Errors are grouped into the categories the application sees: room
//! resolution failures, signaling protocol violations, channel faults and
//! media engine faults. Each category fires at most once per session; the
//! session suppresses follow-on errors after the first report.

use thiserror::Error;

/// Category of a session error, used for the single-fire error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Room lookup failed, malformed directory response, TURN fetch failed.
    RoomResolution,
    /// Message received in the wrong state, duplicate local SDP creation,
    /// unexpected message type.
    Protocol,
    /// Transport drop, malformed inbound frame, relay-reported error.
    Channel,
    /// Failure surfaced by the native media engine.
    Engine,
    /// Operation posted to a session that already shut down.
    Closed,
}

/// Session controller error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Room resolution failed.
    #[error("Room resolution error: {0}")]
    RoomResolution(String),

    /// Signaling protocol violation.
    #[error("Signaling protocol violation: {0}")]
    Protocol(String),

    /// Signaling channel error.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Media engine error.
    #[error("Peer connection error: {0}")]
    Engine(String),

    /// The session is closed; the operation was rejected without running.
    #[error("Session is closed")]
    Closed,
}

impl SessionError {
    /// The reporting category for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::RoomResolution(_) => ErrorKind::RoomResolution,
            SessionError::Protocol(_) => ErrorKind::Protocol,
            SessionError::Channel(_) => ErrorKind::Channel,
            SessionError::Engine(_) => ErrorKind::Engine,
            SessionError::Closed => ErrorKind::Closed,
        }
    }

    /// The message carried by this error, without the category prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            SessionError::RoomResolution(m)
            | SessionError::Protocol(m)
            | SessionError::Channel(m)
            | SessionError::Engine(m) => m.clone(),
            SessionError::Closed => "Session is closed".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SessionError::RoomResolution("x".to_string()).kind(),
            ErrorKind::RoomResolution
        );
        assert_eq!(
            SessionError::Protocol("x".to_string()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            SessionError::Channel("x".to_string()).kind(),
            ErrorKind::Channel
        );
        assert_eq!(
            SessionError::Engine("x".to_string()).kind(),
            ErrorKind::Engine
        );
        assert_eq!(SessionError::Closed.kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::Protocol("Multiple SDP create.".to_string())),
            "Signaling protocol violation: Multiple SDP create."
        );
        assert_eq!(
            format!("{}", SessionError::Channel("socket reset".to_string())),
            "Channel error: socket reset"
        );
    }

    #[test]
    fn test_message_strips_prefix() {
        assert_eq!(
            SessionError::Engine("ICE connection failed.".to_string()).message(),
            "ICE connection failed."
        );
    }
}
