use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{ServerMessage, is_missing_payload};
use super::types::{ConnectionId, OutboundMessage, PeerSender, Room, RoomId, SignalingError};

const MAILBOX_CAPACITY: usize = 1024;

/// Commands sent to the room registry actor
pub(crate) enum RoomCommand {
    Join {
        room: RoomId,
        conn: ConnectionId,
        peer_tx: PeerSender,
        reply: oneshot::Sender<Result<usize, SignalingError>>,
    },
    Relay {
        room: RoomId,
        conn: ConnectionId,
        payload: Option<Value>,
        reply: oneshot::Sender<Result<(), SignalingError>>,
    },
    Leave {
        room: RoomId,
        conn: ConnectionId,
    },
    RoomSize {
        room: RoomId,
        reply: oneshot::Sender<Option<usize>>,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

fn encode(msg: &ServerMessage) -> Option<OutboundMessage> {
    match OutboundMessage::encode(msg) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            None
        }
    }
}

/// Room key to member set. Every key present maps to a non-empty room.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, Room>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`, creating the room if needed.
    ///
    /// On success the joiner's `joined` reply is queued on `peer_tx` before
    /// the other member is sent `peer_joined`, and the new member count is
    /// returned. A full room is left untouched.
    pub fn join(
        &mut self,
        room: RoomId,
        conn: ConnectionId,
        peer_tx: PeerSender,
    ) -> Result<usize, SignalingError> {
        if room.is_empty() {
            return Err(SignalingError::MissingRoom);
        }

        let entry = self.rooms.entry(room.clone()).or_default();
        if entry.is_full() {
            return Err(SignalingError::RoomFull);
        }

        let joined_tx = peer_tx.clone();
        entry.members.insert(conn, peer_tx);
        let peers = entry.members.len();

        if let Some(msg) = encode(&ServerMessage::Joined {
            room: room.clone(),
            peers,
        }) {
            let _ = joined_tx.send(msg);
        }
        if let Some(msg) = encode(&ServerMessage::PeerJoined { room: room.clone() }) {
            entry.send_to_others(conn, &msg);
        }

        if peers == 1 {
            info!("Room {} created by {}", room, conn);
        } else {
            info!("{} joined room {} ({} peers)", conn, room, peers);
        }
        Ok(peers)
    }

    /// Forward `payload` to every member of `room` other than `sender`
    pub fn relay(
        &self,
        room: &RoomId,
        sender: ConnectionId,
        payload: Option<Value>,
    ) -> Result<(), SignalingError> {
        let entry = self
            .rooms
            .get(room)
            .filter(|r| r.members.contains_key(&sender))
            .ok_or(SignalingError::NotInRoom)?;

        let payload = payload
            .filter(|p| !is_missing_payload(Some(p)))
            .ok_or(SignalingError::MissingPayload)?;

        if let Some(msg) = encode(&ServerMessage::Relayed {
            room: room.clone(),
            payload,
        }) {
            let delivered = entry.send_to_others(sender, &msg);
            debug!("{} relayed to {} peer(s) in room {}", sender, delivered, room);
        }
        Ok(())
    }

    /// Remove `conn` from `room`. Deletes the room once it is empty,
    /// otherwise notifies the remaining member. No-op for unknown pairs.
    pub fn leave(&mut self, room: &RoomId, conn: ConnectionId) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };
        if entry.members.remove(&conn).is_none() {
            return;
        }

        if entry.members.is_empty() {
            self.rooms.remove(room);
            info!("{} left room {}; room removed (empty)", conn, room);
        } else {
            if let Some(msg) = encode(&ServerMessage::PeerLeft { room: room.clone() }) {
                entry.send_to_others(conn, &msg);
            }
            info!("{} left room {}", conn, room);
        }
    }

    pub fn room_size(&self, room: &RoomId) -> Option<usize> {
        self.rooms.get(room).map(|r| r.members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

pub(crate) async fn room_registry_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut table = RoomTable::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                room,
                conn,
                peer_tx,
                reply,
            } => {
                let _ = reply.send(table.join(room, conn, peer_tx));
            }

            RoomCommand::Relay {
                room,
                conn,
                payload,
                reply,
            } => {
                let _ = reply.send(table.relay(&room, conn, payload));
            }

            RoomCommand::Leave { room, conn } => table.leave(&room, conn),

            RoomCommand::RoomSize { room, reply } => {
                let _ = reply.send(table.room_size(&room));
            }

            RoomCommand::RoomCount { reply } => {
                let _ = reply.send(table.room_count());
            }
        }
    }

    debug!("Room registry stopped with {} room(s)", table.room_count());
}

/// Handle to the shared room registry.
///
/// Every operation is executed by a single actor task, so each one is atomic
/// with respect to all others. Clone freely; the actor stops once the last
/// handle is dropped.
#[derive(Clone)]
pub struct RoomRegistry {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomRegistry {
    /// Spawn the registry actor on the current tokio runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(MAILBOX_CAPACITY);
        tokio::spawn(room_registry_actor(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(cmd(reply_tx))
            .await
            .map_err(|_| SignalingError::Internal("registry unavailable".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    /// Join `room`, returning the member count including `conn`
    pub async fn join(
        &self,
        room: RoomId,
        conn: ConnectionId,
        peer_tx: PeerSender,
    ) -> Result<usize, SignalingError> {
        self.request(|reply| RoomCommand::Join {
            room,
            conn,
            peer_tx,
            reply,
        })
        .await?
    }

    /// Relay a payload to the other member of `room`
    pub async fn relay(
        &self,
        room: RoomId,
        conn: ConnectionId,
        payload: Option<Value>,
    ) -> Result<(), SignalingError> {
        self.request(|reply| RoomCommand::Relay {
            room,
            conn,
            payload,
            reply,
        })
        .await?
    }

    /// Leave `room`. Safe to call repeatedly.
    pub async fn leave(&self, room: RoomId, conn: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Leave { room, conn }).await;
    }

    /// Current member count of `room`, `None` if it does not exist
    pub async fn room_size(&self, room: RoomId) -> Result<Option<usize>, SignalingError> {
        self.request(|reply| RoomCommand::RoomSize { room, reply })
            .await
    }

    pub async fn room_count(&self) -> Result<usize, SignalingError> {
        self.request(|reply| RoomCommand::RoomCount { reply }).await
    }
}
