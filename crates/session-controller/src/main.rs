//! Session controller demo.
//!
//! Joins a room as a loopback caller with the inert engine and prints
//! session events until the call ends or ctrl-c. Useful for exercising the
//! full signaling path against a real room server without any media stack.
//!
//! ```text
//! PARLEY_ROOM_SERVER_URL=https://rooms.example.org session-controller <room-id>
//! ```

#![warn(clippy::pedantic)]

use std::sync::Arc;

use session_controller::actors::session::SessionActor;
use session_controller::actors::SessionEvent;
use session_controller::config::{Config, SessionConfig};
use session_controller::engine::NullEngine;
use session_controller::room::RoomClient;
use session_controller::transport::WebSocketConnector;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Like the room UI, fall back to a random room name when none given.
    let room_id = std::env::args().nth(1).unwrap_or_else(|| {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("parley-{}", suffix.get(..8).unwrap_or("00000000"))
    });

    let config = Config::from_env()?;
    info!(room_server = %config.room_server_url, room_id = %room_id, "Starting session");

    let room_client = RoomClient::new(&config)?;
    let session_config = SessionConfig::new(&config, room_id, true);

    let (handle, mut events, task) = SessionActor::spawn(
        session_config,
        Box::new(NullEngine::new()),
        Arc::new(WebSocketConnector),
        room_client,
    )?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                if let Err(e) = handle.disconnect().await {
                    warn!(error = %e, "Disconnect after shutdown request");
                }
                break;
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::ConnectedToRoom(params)) => {
                        info!(client_id = %params.client_id, initiator = params.initiator, "Connected to room");
                    }
                    Some(SessionEvent::IceConnected) => info!("ICE connected"),
                    Some(SessionEvent::IceDisconnected) => info!("ICE disconnected"),
                    Some(SessionEvent::RemoteHangup) => info!("Remote hangup"),
                    Some(SessionEvent::Error { kind, message }) => {
                        warn!(kind = ?kind, message = %message, "Session error, disconnecting");
                        if let Err(e) = handle.disconnect().await {
                            warn!(error = %e, "Disconnect after error");
                        }
                        break;
                    }
                    Some(SessionEvent::Closed) | None => {
                        info!("Session closed");
                        break;
                    }
                }
            }
        }
    }

    let _ = task.await;
    Ok(())
}
