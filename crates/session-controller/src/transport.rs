//! Signaling transport channels.
//!
//! A transport is a bidirectional text-message channel to the signaling
//! peer or relay. Two implementations are provided: a WebSocket client for
//! relay-mediated rooms, and a newline-delimited TCP channel for direct
//! peer-to-peer calls where the room identifier is a literal socket
//! address. Tests use an in-memory pair.
//!
//! Inbound traffic and lifecycle changes arrive as [`TransportEvent`]s
//! through an mpsc receiver taken once by the owner.

use crate::errors::SessionError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Buffer size for transport event streams.
pub const TRANSPORT_EVENT_BUFFER: usize = 64;

/// Lifecycle and traffic events of a transport channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open end-to-end (only emitted by transports that
    /// finish connecting after construction, e.g. a listening socket).
    Open,
    /// One inbound text message.
    Message(String),
    /// The channel closed, locally or remotely.
    Closed,
    /// The channel failed.
    Error(String),
}

/// A bidirectional text-message channel to the signaling peer.
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), SessionError>;

    /// Close the channel. The matching [`TransportEvent::Closed`] arrives
    /// on the event stream once the close completes.
    async fn close(&mut self);

    /// Take the event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// Connects a transport to a signaling endpoint URL.
///
/// Abstracted so sessions can be wired to an in-memory channel in tests.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn SignalingTransport>, SessionError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    Message,
>;

/// WebSocket transport to the signaling relay.
pub struct WebSocketTransport {
    sink: WsSink,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl WebSocketTransport {
    /// Connect to a `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Channel(format!("WebSocket connect failed: {e}")))?;
        debug!(target: "session.transport", url = %url, "WebSocket connected");

        let (sink, mut read) = stream.split();
        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if events_tx
                            .send(TransportEvent::Message(text.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = events_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    // Control frames are handled by the library; binary
                    // traffic is not part of this protocol.
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Closed).await;
        });

        Ok(Self {
            sink,
            events_rx: Some(events_rx),
        })
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SessionError::Channel(format!("WebSocket send failed: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(target: "session.transport", error = %e, "WebSocket close frame not sent");
        }
        let _ = self.sink.close().await;
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }
}

/// Production connector: WebSocket per signaling endpoint URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SignalingTransport>, SessionError> {
        Ok(Box::new(WebSocketTransport::connect(url).await?))
    }
}

// ---------------------------------------------------------------------------
// Direct TCP
// ---------------------------------------------------------------------------

enum TcpCommand {
    Send(String),
    Close,
}

/// Newline-delimited JSON over a raw TCP socket, for direct calls without
/// a relay. One side listens and accepts exactly one peer; the other
/// connects out. Messages sent before the peer arrives are queued in order.
pub struct TcpDirectTransport {
    commands_tx: mpsc::Sender<TcpCommand>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    local_addr: SocketAddr,
}

impl TcpDirectTransport {
    /// Connect out to a listening peer.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the connection fails.
    pub async fn connect(addr: SocketAddr) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SessionError::Channel(format!("TCP connect failed: {e}")))?;
        let local_addr = stream
            .local_addr()
            .map_err(|e| SessionError::Channel(format!("TCP socket error: {e}")))?;
        debug!(target: "session.transport", peer = %addr, "TCP connected");

        let (commands_tx, commands_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        tokio::spawn(async move {
            let _ = events_tx.send(TransportEvent::Open).await;
            run_tcp_io(stream, commands_rx, events_tx).await;
        });

        Ok(Self {
            commands_tx,
            events_rx: Some(events_rx),
            local_addr,
        })
    }

    /// Listen on `addr` and accept exactly one peer.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the address cannot be bound.
    pub async fn listen(addr: SocketAddr) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SessionError::Channel(format!("TCP bind failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SessionError::Channel(format!("TCP socket error: {e}")))?;
        debug!(target: "session.transport", addr = %local_addr, "TCP listening");

        let (commands_tx, mut commands_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        tokio::spawn(async move {
            // Sends issued before the peer arrives are held back in order.
            let mut pending: Vec<String> = Vec::new();
            let stream = loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(target: "session.transport", peer = %peer, "TCP peer accepted");
                            break stream;
                        }
                        Err(e) => {
                            let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                            return;
                        }
                    },
                    cmd = commands_rx.recv() => match cmd {
                        Some(TcpCommand::Send(text)) => pending.push(text),
                        Some(TcpCommand::Close) | None => {
                            let _ = events_tx.send(TransportEvent::Closed).await;
                            return;
                        }
                    },
                }
            };

            let _ = events_tx.send(TransportEvent::Open).await;
            let (read_half, mut write_half) = stream.into_split();
            for text in pending.drain(..) {
                if write_line(&mut write_half, &text).await.is_err() {
                    let _ = events_tx
                        .send(TransportEvent::Error("TCP write failed".to_string()))
                        .await;
                    return;
                }
            }
            run_tcp_io_split(read_half, write_half, commands_rx, events_tx).await;
        });

        Ok(Self {
            commands_tx,
            events_rx: Some(events_rx),
            local_addr,
        })
    }

    /// The locally bound address (useful when listening on port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn write_line(write_half: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    write_half.write_all(text.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}

async fn run_tcp_io(
    stream: TcpStream,
    commands_rx: mpsc::Receiver<TcpCommand>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let (read_half, write_half) = stream.into_split();
    run_tcp_io_split(read_half, write_half, commands_rx, events_tx).await;
}

async fn run_tcp_io_split(
    read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    mut commands_rx: mpsc::Receiver<TcpCommand>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            cmd = commands_rx.recv() => match cmd {
                Some(TcpCommand::Send(text)) => {
                    if let Err(e) = write_line(&mut write_half, &text).await {
                        let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                }
                Some(TcpCommand::Close) | None => {
                    let _ = write_half.shutdown().await;
                    let _ = events_tx.send(TransportEvent::Closed).await;
                    return;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    if events_tx.send(TransportEvent::Message(text)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = events_tx.send(TransportEvent::Closed).await;
                    return;
                }
                Err(e) => {
                    let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                    return;
                }
            },
        }
    }
}

#[async_trait]
impl SignalingTransport for TcpDirectTransport {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.commands_tx
            .send(TcpCommand::Send(text))
            .await
            .map_err(|_| SessionError::Channel("TCP channel is gone".to_string()))
    }

    async fn close(&mut self) {
        if self.commands_tx.send(TcpCommand::Close).await.is_err() {
            warn!(target: "session.transport", "TCP close after channel already gone");
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_pair_exchanges_lines() {
        let mut server = TcpDirectTransport::listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut server_events = server.take_events().unwrap();

        let mut client = TcpDirectTransport::connect(server.local_addr()).await.unwrap();
        let mut client_events = client.take_events().unwrap();

        assert_eq!(client_events.recv().await.unwrap(), TransportEvent::Open);
        assert_eq!(server_events.recv().await.unwrap(), TransportEvent::Open);

        client.send("{\"type\":\"bye\"}".to_string()).await.unwrap();
        assert_eq!(
            server_events.recv().await.unwrap(),
            TransportEvent::Message("{\"type\":\"bye\"}".to_string())
        );

        server.send("pong".to_string()).await.unwrap();
        assert_eq!(
            client_events.recv().await.unwrap(),
            TransportEvent::Message("pong".to_string())
        );
    }

    #[tokio::test]
    async fn test_tcp_sends_before_accept_are_queued_in_order() {
        let mut server = TcpDirectTransport::listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut server_events = server.take_events().unwrap();

        server.send("first".to_string()).await.unwrap();
        server.send("second".to_string()).await.unwrap();

        let mut client = TcpDirectTransport::connect(server.local_addr()).await.unwrap();
        let mut client_events = client.take_events().unwrap();
        assert_eq!(client_events.recv().await.unwrap(), TransportEvent::Open);
        assert_eq!(server_events.recv().await.unwrap(), TransportEvent::Open);

        assert_eq!(
            client_events.recv().await.unwrap(),
            TransportEvent::Message("first".to_string())
        );
        assert_eq!(
            client_events.recv().await.unwrap(),
            TransportEvent::Message("second".to_string())
        );
    }

    #[tokio::test]
    async fn test_tcp_close_emits_closed_on_both_sides() {
        let mut server = TcpDirectTransport::listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut server_events = server.take_events().unwrap();
        let mut client = TcpDirectTransport::connect(server.local_addr()).await.unwrap();
        let mut client_events = client.take_events().unwrap();
        assert_eq!(client_events.recv().await.unwrap(), TransportEvent::Open);
        assert_eq!(server_events.recv().await.unwrap(), TransportEvent::Open);

        client.close().await;
        assert_eq!(client_events.recv().await.unwrap(), TransportEvent::Closed);
        assert_eq!(server_events.recv().await.unwrap(), TransportEvent::Closed);
    }
}
