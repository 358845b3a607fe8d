//! Room directory client.
//!
//! Resolves a human-chosen room identifier into session parameters with a
//! single join request, optionally tops up the ICE server list from the
//! provisioning endpoint when the directory returned no TURN relay, and
//! carries the initiator-side relay posts (`message`, `leave`).
//!
//! This layer never retries: any failure here is terminal for session
//! establishment and the caller decides what happens next.

use crate::config::Config;
use crate::errors::SessionError;
use serde::Deserialize;
use signaling_protocol::room::{IceServer, IceServersResponse, JoinResponse, ROOM_RESULT_SUCCESS};
use signaling_protocol::SignalingParameters;
use tracing::{debug, info, warn};

/// Minimal relay response: everything but `result` is ignored.
#[derive(Debug, Deserialize)]
struct PostResponse {
    result: String,
}

/// HTTP client for the room directory and the initiator relay route.
#[derive(Debug, Clone)]
pub struct RoomClient {
    http: reqwest::Client,
}

impl RoomClient {
    /// Build a client with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::RoomResolution(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { http })
    }

    /// Resolve a room into signaling parameters.
    ///
    /// Performs exactly one join request, plus at most one supplementary
    /// ICE-server fetch when the directory's list lacks a TURN relay.
    ///
    /// # Errors
    ///
    /// Returns a room-resolution error for network failures, non-success
    /// result codes and malformed payloads. No retries are attempted.
    pub async fn resolve(
        &self,
        room_url: &str,
        room_id: &str,
    ) -> Result<SignalingParameters, SessionError> {
        let join_url = format!("{room_url}/join/{room_id}");
        debug!(target: "session.room", url = %join_url, "Joining room");

        let response: JoinResponse = self
            .http
            .post(&join_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SessionError::RoomResolution(format!("Room connect failed: {e}")))?
            .json()
            .await
            .map_err(|e| SessionError::RoomResolution(format!("Malformed room response: {e}")))?;

        if response.result != ROOM_RESULT_SUCCESS {
            return Err(SessionError::RoomResolution(format!(
                "Room response error: {}",
                response.result
            )));
        }
        let params = response.params.ok_or_else(|| {
            SessionError::RoomResolution("Room response carries no params".to_string())
        })?;
        let ice_server_url = params.ice_server_url.clone();

        let mut resolved = SignalingParameters::from_room_params(params)
            .map_err(|e| SessionError::RoomResolution(format!("Malformed room response: {e}")))?;

        // The directory list may be STUN-only; a session behind a strict NAT
        // is then unreachable, so fetch relays from the provisioning
        // endpoint before reporting the room as resolved.
        if !resolved.has_turn_server() {
            if let Some(url) = ice_server_url {
                let extra = self.request_ice_servers(&url, room_url).await?;
                info!(
                    target: "session.room",
                    count = extra.len(),
                    "Appended provisioned ICE servers"
                );
                resolved.ice_servers.extend(extra);
            } else {
                warn!(target: "session.room", "No TURN relay and no provisioning endpoint");
            }
        }

        info!(
            target: "session.room",
            room_id = %resolved.room_id,
            client_id = %resolved.client_id,
            initiator = resolved.initiator,
            ice_servers = resolved.ice_servers.len(),
            "Room resolved"
        );
        Ok(resolved)
    }

    /// Fetch TURN relays from the ICE-server-provisioning endpoint.
    async fn request_ice_servers(
        &self,
        url: &str,
        referer: &str,
    ) -> Result<Vec<IceServer>, SessionError> {
        debug!(target: "session.room", url = %url, "Requesting ICE servers");
        let response: IceServersResponse = self
            .http
            .post(url)
            .header(reqwest::header::REFERER, referer)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SessionError::RoomResolution(format!("ICE server fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| {
                SessionError::RoomResolution(format!("Malformed ICE server response: {e}"))
            })?;
        Ok(response.ice_servers)
    }

    /// Post one signaling message through the room relay (initiator route).
    ///
    /// # Errors
    ///
    /// Returns a channel error for network failures or a non-success relay
    /// result.
    pub async fn send_message(
        &self,
        room_url: &str,
        room_id: &str,
        client_id: &str,
        payload: String,
    ) -> Result<(), SessionError> {
        let url = format!("{room_url}/message/{room_id}/{client_id}");
        debug!(target: "session.room", url = %url, "Posting relay message");

        let response: PostResponse = self
            .http
            .post(&url)
            .body(payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SessionError::Channel(format!("Relay post failed: {e}")))?
            .json()
            .await
            .map_err(|e| SessionError::Channel(format!("Malformed relay response: {e}")))?;

        if response.result != ROOM_RESULT_SUCCESS {
            return Err(SessionError::Channel(format!(
                "Relay post error: {}",
                response.result
            )));
        }
        Ok(())
    }

    /// Tell the directory this peer left the room. Best-effort.
    pub async fn leave(&self, room_url: &str, room_id: &str, client_id: &str) {
        let url = format!("{room_url}/leave/{room_id}/{client_id}");
        debug!(target: "session.room", url = %url, "Leaving room");
        if let Err(e) = self.http.post(&url).send().await {
            warn!(target: "session.room", error = %e, "Leave notification failed");
        }
    }
}
