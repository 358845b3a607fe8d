//! Relay envelopes for the live signaling channel.
//!
//! The relay requires a registration handshake before it will route
//! application traffic, and wraps both directions:
//!
//! ```text
//! -> {"cmd":"register","roomid":"<id>","clientid":"<id>"}
//! -> {"cmd":"send","msg":"<inner JSON string>"}
//! <- {"msg":"<inner JSON string>","error":"<optional relay error>"}
//! ```

use crate::message::ProtocolError;
use serde::{Deserialize, Serialize};

/// Outbound command to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum RelayCommand {
    /// Identify this session to the relay. Must precede any `send`.
    #[serde(rename = "register")]
    Register { roomid: String, clientid: String },

    /// Application payload, carried opaquely as a JSON string.
    #[serde(rename = "send")]
    Send { msg: String },
}

impl RelayCommand {
    /// Encode to the wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Inbound frame from the relay.
///
/// A frame carries either an application payload in `msg` or a relay-level
/// error in `error`; an empty `msg` with an empty `error` is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayFrame {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub error: String,
}

/// Payload extracted from an inbound relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    /// Application message to hand to the signaling layer.
    Message(String),
    /// Relay-reported error, e.g. the remote client id is unknown.
    Error(String),
}

impl RelayFrame {
    /// Decode a raw relay frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Split the frame into an application payload or a relay error.
    ///
    /// # Errors
    ///
    /// Returns an error for a frame carrying neither.
    pub fn into_payload(self) -> Result<RelayPayload, ProtocolError> {
        if !self.msg.is_empty() {
            Ok(RelayPayload::Message(self.msg))
        } else if !self.error.is_empty() {
            Ok(RelayPayload::Error(self.error))
        } else {
            Err(ProtocolError::Malformed(
                "relay frame carries neither msg nor error".to_string(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_form() {
        let json = RelayCommand::Register {
            roomid: "room-7".to_string(),
            clientid: "client-9".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(
            json,
            "{\"cmd\":\"register\",\"roomid\":\"room-7\",\"clientid\":\"client-9\"}"
        );
    }

    #[test]
    fn test_send_wraps_inner_json_as_string() {
        let inner = "{\"type\":\"bye\"}";
        let json = RelayCommand::Send {
            msg: inner.to_string(),
        }
        .to_json()
        .unwrap();
        // The inner JSON is escaped into a plain string field.
        assert_eq!(json, "{\"cmd\":\"send\",\"msg\":\"{\\\"type\\\":\\\"bye\\\"}\"}");
    }

    #[test]
    fn test_inbound_message_frame() {
        let frame = RelayFrame::from_json("{\"msg\":\"{\\\"type\\\":\\\"bye\\\"}\"}").unwrap();
        assert_eq!(
            frame.into_payload().unwrap(),
            RelayPayload::Message("{\"type\":\"bye\"}".to_string())
        );
    }

    #[test]
    fn test_inbound_error_frame() {
        let frame = RelayFrame::from_json("{\"msg\":\"\",\"error\":\"unknown client\"}").unwrap();
        assert_eq!(
            frame.into_payload().unwrap(),
            RelayPayload::Error("unknown client".to_string())
        );
    }

    #[test]
    fn test_message_wins_over_error() {
        // A frame with both carries a routable payload; the error is relay
        // noise and the payload must not be lost.
        let frame = RelayFrame {
            msg: "{\"type\":\"bye\"}".to_string(),
            error: "late error".to_string(),
        };
        assert!(matches!(frame.into_payload().unwrap(), RelayPayload::Message(_)));
    }

    #[test]
    fn test_empty_frame_is_malformed() {
        let frame = RelayFrame::from_json("{}").unwrap();
        assert!(frame.into_payload().is_err());
    }
}
