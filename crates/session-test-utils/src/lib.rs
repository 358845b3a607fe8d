//! Test utilities for the Parley session controller.
//!
//! - [`scripted_engine`] - a media engine double that records every call
//!   and lets the test inject engine events.
//! - [`memory_transport`] - an in-memory transport pair plus a relay-side
//!   harness speaking the envelope protocol.
//! - [`room_fixtures`] - canned room directory payloads and a wiremock
//!   room server.

pub mod memory_transport;
pub mod room_fixtures;
pub mod scripted_engine;

pub use memory_transport::{MemoryConnector, MemoryTransport, RemoteRelay};
pub use room_fixtures::{candidate_message, join_response, offer_message, start_room_server};
pub use scripted_engine::{EngineCall, EngineProbe, ScriptedEngine};
