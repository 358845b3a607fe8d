//! Signaling wire protocol for Parley.
//!
//! This crate defines the JSON messages two peers exchange through a
//! signaling relay to negotiate a media session: session descriptions,
//! ICE candidates, candidate removals and the session-termination signal,
//! plus the relay envelopes and room-directory payloads that surround them.
//!
//! The media itself never touches this crate; only negotiation state does.

#![warn(clippy::pedantic)]

pub mod message;
pub mod relay;
pub mod room;

pub use message::{IceCandidate, ProtocolError, SdpType, SessionDescription, SignalingMessage};
pub use room::SignalingParameters;
