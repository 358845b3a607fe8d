//! Application-level signaling messages.
//!
//! Wire format (one JSON object per message, `type` discriminator):
//!
//! ```text
//! {"type":"offer","sdp":"<text>"}
//! {"type":"answer","sdp":"<text>"}
//! {"type":"candidate","label":<mline index>,"id":"<mid>","candidate":"<text>"}
//! {"type":"remove-candidates","candidates":[<candidate objects>]}
//! {"type":"bye"}
//! ```

use serde::{Deserialize, Serialize};

/// Error type for protocol encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON or is missing required fields.
    #[error("Malformed signaling payload: {0}")]
    Malformed(String),

    /// The `type` discriminator names no known message.
    #[error("Unexpected signaling message type: {0}")]
    UnknownType(String),
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    /// Canonical wire string for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// An SDP offer or answer.
///
/// Immutable value: a description is produced once per negotiation round and
/// superseded, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// The same description text re-labelled with another kind.
    ///
    /// Used by the loopback harness, which routes a local offer back to the
    /// sender as if the remote side had answered with it.
    #[must_use]
    pub fn relabel(&self, kind: SdpType) -> Self {
        Self {
            kind,
            sdp: self.sdp.clone(),
        }
    }
}

/// One network path proposed by a peer.
///
/// `server_url` is local bookkeeping (which ICE server produced the
/// candidate) and never appears on the wire. Candidate identity for removal
/// purposes is the full (mid, line index, candidate string) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub sdp_mid: String,
    pub sdp_m_line_index: i32,
    pub candidate: String,
    pub server_url: String,
}

impl IceCandidate {
    #[must_use]
    pub fn new(sdp_mid: impl Into<String>, sdp_m_line_index: i32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_m_line_index,
            candidate: candidate.into(),
            server_url: String::new(),
        }
    }
}

/// Wire representation of a candidate: `label` is the media-line index and
/// `id` the media stream identification tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCandidate {
    pub label: i32,
    pub id: String,
    pub candidate: String,
}

impl From<&IceCandidate> for WireCandidate {
    fn from(c: &IceCandidate) -> Self {
        Self {
            label: c.sdp_m_line_index,
            id: c.sdp_mid.clone(),
            candidate: c.candidate.clone(),
        }
    }
}

impl From<WireCandidate> for IceCandidate {
    fn from(w: WireCandidate) -> Self {
        Self {
            sdp_mid: w.id,
            sdp_m_line_index: w.label,
            candidate: w.candidate,
            server_url: String::new(),
        }
    }
}

/// A signaling message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    #[serde(rename = "offer")]
    Offer { sdp: String },

    #[serde(rename = "answer")]
    Answer { sdp: String },

    #[serde(rename = "candidate")]
    Candidate {
        label: i32,
        id: String,
        candidate: String,
    },

    #[serde(rename = "remove-candidates")]
    RemoveCandidates { candidates: Vec<WireCandidate> },

    #[serde(rename = "bye")]
    Bye,
}

impl SignalingMessage {
    /// Build the wire message for an offer or answer.
    #[must_use]
    pub fn from_description(desc: &SessionDescription) -> Self {
        match desc.kind {
            SdpType::Offer => SignalingMessage::Offer {
                sdp: desc.sdp.clone(),
            },
            SdpType::Answer => SignalingMessage::Answer {
                sdp: desc.sdp.clone(),
            },
        }
    }

    /// Build the wire message for a locally generated candidate.
    #[must_use]
    pub fn from_candidate(candidate: &IceCandidate) -> Self {
        SignalingMessage::Candidate {
            label: candidate.sdp_m_line_index,
            id: candidate.sdp_mid.clone(),
            candidate: candidate.candidate.clone(),
        }
    }

    /// Build the wire message announcing candidate removals.
    #[must_use]
    pub fn from_removals(candidates: &[IceCandidate]) -> Self {
        SignalingMessage::RemoveCandidates {
            candidates: candidates.iter().map(WireCandidate::from).collect(),
        }
    }

    /// Encode to the single-line JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode a message from its JSON wire form.
    ///
    /// An unknown `type` discriminator is reported distinctly from malformed
    /// JSON so the session can surface it as a protocol violation rather
    /// than a transport fault.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for invalid JSON or missing
    /// fields and [`ProtocolError::UnknownType`] for an unrecognized
    /// discriminator.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing type field".to_string()))?;
        match kind {
            "offer" | "answer" | "candidate" | "remove-candidates" | "bye" => {
                serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_round_trip() {
        let msg = SignalingMessage::Offer {
            sdp: "v=0\r\n".to_string(),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        assert_eq!(SignalingMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_candidate_wire_fields() {
        let candidate = IceCandidate::new("audio", 0, "candidate:1 1 udp 2122260223 10.0.0.1 9 typ host");
        let json = SignalingMessage::from_candidate(&candidate).to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["label"], 0);
        assert_eq!(value["id"], "audio");
        assert_eq!(
            value["candidate"],
            "candidate:1 1 udp 2122260223 10.0.0.1 9 typ host"
        );
        // Local bookkeeping must not leak to the wire.
        assert!(value.get("server_url").is_none());
    }

    #[test]
    fn test_remove_candidates_round_trip() {
        let candidates = vec![
            IceCandidate::new("audio", 0, "candidate:a"),
            IceCandidate::new("video", 1, "candidate:b"),
        ];
        let json = SignalingMessage::from_removals(&candidates).to_json().unwrap();

        match SignalingMessage::from_json(&json).unwrap() {
            SignalingMessage::RemoveCandidates { candidates: wire } => {
                assert_eq!(wire.len(), 2);
                assert_eq!(wire[0].id, "audio");
                assert_eq!(wire[1].label, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_bye_has_no_payload() {
        let json = SignalingMessage::Bye.to_json().unwrap();
        assert_eq!(json, "{\"type\":\"bye\"}");
    }

    #[test]
    fn test_unknown_type_is_distinct_error() {
        let err = SignalingMessage::from_json("{\"type\":\"renegotiate\"}").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "renegotiate"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SignalingMessage::from_json("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            SignalingMessage::from_json("{\"sdp\":\"x\"}"),
            Err(ProtocolError::Malformed(_))
        ));
        // Right discriminator, missing fields.
        assert!(matches!(
            SignalingMessage::from_json("{\"type\":\"candidate\"}"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_relabel_keeps_text() {
        let offer = SessionDescription::new(SdpType::Offer, "v=0\r\n");
        let answer = offer.relabel(SdpType::Answer);
        assert_eq!(answer.kind, SdpType::Answer);
        assert_eq!(answer.sdp, offer.sdp);
    }
}
