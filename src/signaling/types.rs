use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Maximum number of connections a room can hold
pub const MAX_ROOM_PEERS: usize = 2;

/// Signaling errors.
///
/// The `Display` output of the protocol variants is sent verbatim to clients
/// in the `error` field, so these strings are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("Missing room")]
    MissingRoom,

    #[error("Room is full (max 2 peers)")]
    RoomFull,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Missing payload")]
    MissingPayload,

    #[error("Already in a room")]
    AlreadyJoined,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Opaque room key chosen by clients
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(Arc<str>);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RoomId::from(s))
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one accepted connection.
///
/// Two handles compare equal only if they were produced by the same call to
/// [`ConnectionId::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Serialize a message into a text frame body
    pub fn encode<T: Serialize>(msg: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(msg).map(Self::from)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Sending half of a connection's outbound queue.
///
/// Sends never block; they fail only once the connection's writer is gone.
pub type PeerSender = mpsc::UnboundedSender<OutboundMessage>;

#[derive(Debug, Default)]
pub(crate) struct Room {
    pub members: HashMap<ConnectionId, PeerSender>,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_ROOM_PEERS
    }

    /// Queue a message for every member except `except`, ignoring closed channels
    pub fn send_to_others(&self, except: ConnectionId, msg: &OutboundMessage) -> usize {
        self.members
            .iter()
            .filter(|(id, _)| **id != except)
            .filter(|(_, tx)| tx.send(msg.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_strings_match_wire_format() {
        assert_eq!(SignalingError::MissingRoom.to_string(), "Missing room");
        assert_eq!(
            SignalingError::RoomFull.to_string(),
            "Room is full (max 2 peers)"
        );
        assert_eq!(SignalingError::NotInRoom.to_string(), "Not in a room");
        assert_eq!(SignalingError::MissingPayload.to_string(), "Missing payload");
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId(42);
        assert_eq!(format!("{}", id), "conn-42");
    }

    #[test]
    fn room_id_keeps_arbitrary_keys() {
        let room = RoomId::from("a rather long room name with spaces");
        assert_eq!(room.as_str(), "a rather long room name with spaces");
        assert!(!room.is_empty());
        assert!(RoomId::from("").is_empty());
    }

    #[test]
    fn room_id_serialization() {
        let room = RoomId::from("r1");
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"r1\"");
        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, room);
    }

    #[test]
    fn outbound_message_encodes_json() {
        let msg = OutboundMessage::encode(&serde_json::json!({"action": "peer_left"})).unwrap();
        assert_eq!(msg.as_str(), r#"{"action":"peer_left"}"#);
        assert_eq!(msg.into_inner().as_str(), r#"{"action":"peer_left"}"#);
    }

    #[test]
    fn room_send_to_others_skips_sender_and_closed_channels() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, rx_c) = mpsc::unbounded_channel();
        drop(rx_c);

        let a = ConnectionId::next();
        let b = ConnectionId::next();
        let c = ConnectionId::next();
        let room = Room {
            members: HashMap::from([(a, tx_a), (b, tx_b), (c, tx_c)]),
        };

        let delivered = room.send_to_others(a, &OutboundMessage::from("hi".to_string()));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().as_str(), "hi");
    }
}
