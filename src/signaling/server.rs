use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::RoomRegistry;
use super::messages::{ClientMessage, ServerMessage};
use super::types::{ConnectionId, OutboundMessage, PeerSender, RoomId, SignalingError};
use crate::config::Keepalive;

/// How long the writer may keep flushing after the session ends
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub struct SignalingServer {
    listener: TcpListener,
    registry: RoomRegistry,
    keepalive: Keepalive,
}

impl SignalingServer {
    /// Bind the listener and spawn the room registry
    pub async fn bind(addr: &str, keepalive: Keepalive) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: RoomRegistry::spawn(),
            keepalive,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the registry shared by every connection of this server
    pub fn registry(&self) -> RoomRegistry {
        self.registry.clone()
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let registry = self.registry.clone();
            let keepalive = self.keepalive;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry, keepalive).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RoomRegistry,
    keepalive: Keepalive,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    run_session(ws_stream, addr, registry, keepalive).await;
    Ok(())
}

enum Flow {
    Continue,
    Close,
}

/// Drive one client session over an established WebSocket until the client
/// leaves, closes, or stops answering pings.
///
/// Whatever the reason the session ends, the connection is removed from its
/// room so the remaining peer sees `peer_left`.
async fn run_session<S>(
    ws_stream: S,
    addr: SocketAddr,
    registry: RoomRegistry,
    keepalive: Keepalive,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Send
        + 'static,
{
    let conn = ConnectionId::next();
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connection {} from {}", conn, addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut room: Option<RoomId> = None;
    let mut ping_interval = tokio::time::interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<Instant> = None;

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    let closing = matches!(ctrl_msg, Message::Close(_));
                    if ws_tx.send(ctrl_msg).await.is_err() || closing {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let deadline = pong_deadline;
        let pong_timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", conn);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(Instant::now() + keepalive.pong_timeout);
                debug!("Ping sent to {}", conn);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", conn);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                };

                let flow = match msg {
                    Message::Text(text) => {
                        handle_text_message(text.as_str(), conn, &tx, &registry, &mut room).await
                    }
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text_message(text, conn, &tx, &registry, &mut room).await,
                        Err(e) => {
                            warn!("Non UTF-8 binary frame from {}", conn);
                            reply_error(&tx, format!("Invalid message: {}", e));
                            Flow::Continue
                        }
                    },
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", conn);
                        Flow::Continue
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", conn);
                        Flow::Close
                    }
                    _ => Flow::Continue,
                };

                if let Flow::Close = flow {
                    break;
                }
            }
        }
    }

    // Abrupt or graceful, the cleanup is the same as an explicit leave.
    if let Some(room) = room.take() {
        registry.leave(room, conn).await;
    }

    let _ = ctrl_tx.send(Message::Close(None));
    if tokio::time::timeout(CLOSE_GRACE, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    info!("WebSocket disconnected: {} ({})", conn, addr);
}

fn reply(tx: &PeerSender, msg: &ServerMessage) {
    match OutboundMessage::encode(msg) {
        Ok(out) => {
            let _ = tx.send(out);
        }
        Err(e) => warn!("Failed to encode reply: {}", e),
    }
}

fn reply_error(tx: &PeerSender, error: impl fmt::Display) {
    reply(
        tx,
        &ServerMessage::Error {
            error: error.to_string(),
        },
    );
}

async fn handle_text_message(
    text: &str,
    conn: ConnectionId,
    tx: &PeerSender,
    registry: &RoomRegistry,
    room: &mut Option<RoomId>,
) -> Flow {
    let client_msg = match ClientMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Invalid message from {}: {}", conn, e);
            reply_error(tx, format!("Invalid message: {}", e));
            return Flow::Continue;
        }
    };

    match client_msg {
        ClientMessage::Join { room: requested } => {
            if room.is_some() {
                reply_error(tx, SignalingError::AlreadyJoined);
                return Flow::Continue;
            }

            // The registry queues the `joined` reply itself so it is ordered
            // ahead of anything the other peer sends afterwards.
            let requested = RoomId::from(requested.unwrap_or_default());
            match registry.join(requested.clone(), conn, tx.clone()).await {
                Ok(_) => *room = Some(requested),
                Err(e) => reply_error(tx, e),
            }
        }

        ClientMessage::Relay { payload, .. } => {
            let Some(current) = room.as_ref() else {
                reply_error(tx, SignalingError::NotInRoom);
                return Flow::Continue;
            };
            if let Err(e) = registry.relay(current.clone(), conn, payload).await {
                reply_error(tx, e);
            }
        }

        ClientMessage::Leave { .. } => {
            if let Some(current) = room.take() {
                registry.leave(current, conn).await;
            }
            return Flow::Close;
        }

        ClientMessage::Unknown => {
            debug!("Ignoring unknown action from {}", conn);
        }
    }

    Flow::Continue
}
