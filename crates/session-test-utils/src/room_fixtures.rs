//! Room directory fixtures.
//!
//! Canned join payloads plus a wiremock room server that answers the join,
//! message and leave routes the session uses. Message posts are recorded
//! by wiremock and can be asserted through `received_requests`.

use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Room id the fixtures use.
pub const TEST_ROOM_ID: &str = "room-1";

/// Client id the fixtures use.
pub const TEST_CLIENT_ID: &str = "client-1";

/// Inner JSON for a backlog or live offer message.
#[must_use]
pub fn offer_message(sdp: &str) -> String {
    serde_json::json!({ "type": "offer", "sdp": sdp }).to_string()
}

/// Inner JSON for a backlog or live candidate message.
#[must_use]
pub fn candidate_message(label: i32, id: &str, candidate: &str) -> String {
    serde_json::json!({
        "type": "candidate",
        "label": label,
        "id": id,
        "candidate": candidate,
    })
    .to_string()
}

/// A complete join response body.
#[must_use]
pub fn join_response(
    initiator: bool,
    wss_url: &str,
    wss_post_url: &str,
    messages: &[String],
) -> serde_json::Value {
    serde_json::json!({
        "result": "SUCCESS",
        "params": {
            "room_id": TEST_ROOM_ID,
            "client_id": TEST_CLIENT_ID,
            "wss_url": wss_url,
            "wss_post_url": wss_post_url,
            // The reference directory emits string booleans.
            "is_initiator": if initiator { "true" } else { "false" },
            "pc_config": {
                "iceServers": [
                    { "urls": ["turn:turn.example.org"], "username": "u", "credential": "p" }
                ]
            },
            "messages": messages,
        }
    })
}

/// Start a mock room server answering join, message and leave.
pub async fn start_room_server(initiator: bool, wss_url: &str, messages: &[String]) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/join/.*$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(join_response(initiator, wss_url, &server.uri(), messages)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/message/.*$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "SUCCESS" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/leave/.*$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}
