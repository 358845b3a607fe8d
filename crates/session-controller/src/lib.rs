//! Parley session controller.
//!
//! A signaling-coordinated peer connection session manager: everything
//! needed to establish, maintain and tear down a real-time media session
//! between two peers over an untrusted, asynchronous signaling channel.
//! The media engine itself (codecs, RTP, ICE connectivity) sits behind the
//! [`engine::MediaEngine`] trait and is supplied by the caller.
//!
//! # Architecture
//!
//! ```text
//! application
//!   └── SessionActor (one per call)
//!         ├── RoomClient            one-shot room resolution + relay posts
//!         ├── ChannelClient         registration handshake over a transport
//!         └── CoordinatorActor      owns the engine, buffers candidates
//!               └── MediaEngine    (caller-supplied)
//! ```
//!
//! A session is one offer/answer exchange: the room directory assigns the
//! role, the initiator creates the offer and posts it through the relay's
//! HTTP route, the answerer replies over the live channel, and remote
//! candidates buffer in the coordinator until both descriptions are
//! applied.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_controller::actors::session::SessionActor;
//! use session_controller::config::{Config, SessionConfig};
//! use session_controller::engine::NullEngine;
//! use session_controller::room::RoomClient;
//! use session_controller::transport::WebSocketConnector;
//! use std::sync::Arc;
//!
//! let config = Config::from_env()?;
//! let session_config = SessionConfig::new(&config, "my-room", false);
//! let room_client = RoomClient::new(&config)?;
//!
//! let (handle, mut events, _task) = SessionActor::spawn(
//!     session_config,
//!     Box::new(NullEngine::new()),
//!     Arc::new(WebSocketConnector),
//!     room_client,
//! )?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! handle.disconnect().await?;
//! ```

#![warn(clippy::pedantic)]

pub mod actors;
pub mod channel;
pub mod config;
pub mod engine;
pub mod errors;
pub mod room;
pub mod sdp;
pub mod transport;

pub use actors::{SessionEvent, SessionHandle};
pub use errors::{ErrorKind, SessionError};
