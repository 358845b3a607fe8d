//! Room directory payloads.
//!
//! Joining a room is a one-shot HTTP exchange:
//!
//! ```text
//! {"result":"SUCCESS","params":{"room_id":...,"client_id":...,
//!  "wss_url":...,"wss_post_url":...,"is_initiator":...,"pc_config":...,
//!  "messages":[...],"ice_server_url":...}}
//! ```
//!
//! The reference directory service encodes `is_initiator` as the string
//! `"true"`/`"false"` and `pc_config` as a JSON string rather than an
//! inline object; both forms are accepted here.

use crate::message::{IceCandidate, ProtocolError, SdpType, SessionDescription, SignalingMessage};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Result string the directory sends on success.
pub const ROOM_RESULT_SUCCESS: &str = "SUCCESS";

/// Top-level room join response.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinResponse {
    pub result: String,
    #[serde(default)]
    pub params: Option<RoomParams>,
}

/// Raw `params` object of a join response.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomParams {
    pub room_id: String,
    pub client_id: String,
    pub wss_url: String,
    pub wss_post_url: String,
    #[serde(deserialize_with = "bool_or_string")]
    pub is_initiator: bool,
    #[serde(default, deserialize_with = "pc_config_inline_or_string")]
    pub pc_config: Option<PcConfig>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub ice_server_url: Option<String>,
}

/// Peer connection configuration block (`pc_config`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PcConfig {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// One STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "string_or_seq")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    /// Whether any of this server's URLs names a TURN relay.
    #[must_use]
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Response of the ICE-server-provisioning endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// Resolved session metadata. Created once at session start and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct SignalingParameters {
    pub ice_servers: Vec<IceServer>,
    pub initiator: bool,
    pub room_id: String,
    pub client_id: String,
    pub wss_url: String,
    pub wss_post_url: String,
    /// Offer already queued server-side before this peer joined.
    pub offer_sdp: Option<SessionDescription>,
    /// Candidate backlog queued server-side before this peer joined.
    pub ice_candidates: Vec<IceCandidate>,
}

impl SignalingParameters {
    /// Assemble resolved parameters from a join response's `params`.
    ///
    /// The backlog only exists for the joining (non-initiating) peer; the
    /// directory relays whatever the initiator already posted. Backlog
    /// entries of unknown type are skipped with a warning, matching the
    /// tolerant behavior of the reference client.
    ///
    /// # Errors
    ///
    /// Returns an error when a backlog entry is not valid JSON.
    pub fn from_room_params(params: RoomParams) -> Result<Self, ProtocolError> {
        let mut offer_sdp = None;
        let mut ice_candidates = Vec::new();

        if !params.is_initiator {
            for raw in &params.messages {
                match SignalingMessage::from_json(raw)? {
                    SignalingMessage::Offer { sdp } => {
                        offer_sdp = Some(SessionDescription::new(SdpType::Offer, sdp));
                    }
                    SignalingMessage::Candidate {
                        label,
                        id,
                        candidate,
                    } => {
                        ice_candidates.push(IceCandidate::new(id, label, candidate));
                    }
                    other => {
                        warn!(target: "session.room", message = ?other, "Unexpected backlog message");
                    }
                }
            }
        }

        Ok(Self {
            ice_servers: params.pc_config.unwrap_or_default().ice_servers,
            initiator: params.is_initiator,
            room_id: params.room_id,
            client_id: params.client_id,
            wss_url: params.wss_url,
            wss_post_url: params.wss_post_url,
            offer_sdp,
            ice_candidates,
        })
    }

    /// Whether the resolved server list already includes a TURN relay.
    #[must_use]
    pub fn has_turn_server(&self) -> bool {
        self.ice_servers.iter().any(IceServer::is_turn)
    }
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(s) => match s.as_str() {
            "true" | "True" => Ok(true),
            "false" | "False" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "not a boolean: {other:?}"
            ))),
        },
    }
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSeq {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrSeq::deserialize(deserializer)? {
        StringOrSeq::One(s) => vec![s],
        StringOrSeq::Many(v) => v,
    })
}

fn pc_config_inline_or_string<'de, D>(deserializer: D) -> Result<Option<PcConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum InlineOrString {
        Inline(PcConfig),
        Text(String),
    }

    match Option::<InlineOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(InlineOrString::Inline(cfg)) => Ok(Some(cfg)),
        Some(InlineOrString::Text(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn join_json(is_initiator: &str, messages: &str) -> String {
        format!(
            concat!(
                "{{\"result\":\"SUCCESS\",\"params\":{{",
                "\"room_id\":\"r1\",\"client_id\":\"c1\",",
                "\"wss_url\":\"wss://relay/ws\",",
                "\"wss_post_url\":\"https://relay\",",
                "\"is_initiator\":{},",
                "\"pc_config\":\"{{\\\"iceServers\\\":[{{\\\"urls\\\":\\\"stun:stun.example.org\\\"}}]}}\",",
                "\"messages\":{}}}}}",
            ),
            is_initiator, messages
        )
    }

    #[test]
    fn test_parse_initiator_response_with_string_fields() {
        let response: JoinResponse = serde_json::from_str(&join_json("\"true\"", "[]")).unwrap();
        assert_eq!(response.result, ROOM_RESULT_SUCCESS);

        let params = SignalingParameters::from_room_params(response.params.unwrap()).unwrap();
        assert!(params.initiator);
        assert_eq!(params.room_id, "r1");
        assert_eq!(params.client_id, "c1");
        assert_eq!(params.ice_servers.len(), 1);
        assert_eq!(params.ice_servers[0].urls, vec!["stun:stun.example.org"]);
        assert!(params.offer_sdp.is_none());
        assert!(params.ice_candidates.is_empty());
    }

    #[test]
    fn test_parse_joiner_backlog() {
        let messages = concat!(
            "[\"{\\\"type\\\":\\\"offer\\\",\\\"sdp\\\":\\\"v=0\\\"}\",",
            "\"{\\\"type\\\":\\\"candidate\\\",\\\"label\\\":0,",
            "\\\"id\\\":\\\"audio\\\",\\\"candidate\\\":\\\"candidate:a\\\"}\"]",
        );
        let response: JoinResponse =
            serde_json::from_str(&join_json("false", messages)).unwrap();
        let params = SignalingParameters::from_room_params(response.params.unwrap()).unwrap();

        assert!(!params.initiator);
        let offer = params.offer_sdp.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert_eq!(offer.sdp, "v=0");
        assert_eq!(params.ice_candidates.len(), 1);
        assert_eq!(params.ice_candidates[0].sdp_mid, "audio");
    }

    #[test]
    fn test_backlog_ignored_for_initiator() {
        let messages = "[\"{\\\"type\\\":\\\"offer\\\",\\\"sdp\\\":\\\"v=0\\\"}\"]";
        let response: JoinResponse = serde_json::from_str(&join_json("true", messages)).unwrap();
        let params = SignalingParameters::from_room_params(response.params.unwrap()).unwrap();
        assert!(params.offer_sdp.is_none());
    }

    #[test]
    fn test_inline_pc_config_and_bool() {
        let raw = concat!(
            "{\"result\":\"SUCCESS\",\"params\":{",
            "\"room_id\":\"r\",\"client_id\":\"c\",",
            "\"wss_url\":\"wss://relay/ws\",\"wss_post_url\":\"https://relay\",",
            "\"is_initiator\":true,",
            "\"pc_config\":{\"iceServers\":[",
            "{\"urls\":[\"turn:turn.example.org\"],\"username\":\"u\",\"credential\":\"p\"}]}}}",
        );
        let response: JoinResponse = serde_json::from_str(raw).unwrap();
        let params = SignalingParameters::from_room_params(response.params.unwrap()).unwrap();
        assert!(params.has_turn_server());
        assert_eq!(params.ice_servers[0].username, "u");
    }

    #[test]
    fn test_turn_detection() {
        let stun = IceServer {
            urls: vec!["stun:stun.example.org".to_string()],
            username: String::new(),
            credential: String::new(),
        };
        let turns = IceServer {
            urls: vec!["turns:turn.example.org:5349".to_string()],
            username: String::new(),
            credential: String::new(),
        };
        assert!(!stun.is_turn());
        assert!(turns.is_turn());
    }

    #[test]
    fn test_ice_servers_response() {
        let raw = concat!(
            "{\"iceServers\":[{\"urls\":[\"turn:a\",\"turn:b\"],",
            "\"username\":\"u\",\"credential\":\"p\"}]}",
        );
        let response: IceServersResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.ice_servers.len(), 1);
        assert_eq!(response.ice_servers[0].urls.len(), 2);
    }

    #[test]
    fn test_malformed_backlog_entry_is_an_error() {
        let messages = "[\"{not json\"]";
        let response: JoinResponse = serde_json::from_str(&join_json("false", messages)).unwrap();
        assert!(SignalingParameters::from_room_params(response.params.unwrap()).is_err());
    }
}
