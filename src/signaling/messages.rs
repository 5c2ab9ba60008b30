use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::RoomId;

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// Join (or create) a room by key
    #[serde(rename = "join")]
    Join {
        #[serde(default)]
        room: Option<String>,
    },

    /// Forward an opaque payload to the other member of the current room.
    /// `room` is accepted for compatibility; the session's room is used.
    #[serde(rename = "relay")]
    Relay {
        #[serde(default)]
        room: Option<String>,
        #[serde(default)]
        payload: Option<Value>,
    },

    /// Leave the current room and end the session
    #[serde(rename = "leave")]
    Leave {
        #[serde(default)]
        room: Option<String>,
    },

    /// Any action this server does not know about
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse one inbound frame.
    ///
    /// An object without a string `action` is treated like an unknown action;
    /// anything that is not a JSON object, or an object with bad fields for a
    /// known action, is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if value.is_object() && !value.get("action").is_some_and(Value::is_string) {
            return Ok(Self::Unknown);
        }
        serde_json::from_value(value)
    }
}

/// Messages sent from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ServerMessage {
    /// Join succeeded; `peers` counts the joiner too
    #[serde(rename = "joined")]
    Joined { room: RoomId, peers: usize },

    /// The other peer joined the room
    #[serde(rename = "peer_joined")]
    PeerJoined { room: RoomId },

    /// Payload forwarded from the other peer
    #[serde(rename = "relayed")]
    Relayed { room: RoomId, payload: Value },

    /// The other peer left or disconnected
    #[serde(rename = "peer_left")]
    PeerLeft { room: RoomId },

    /// Error response
    #[serde(rename = "error")]
    Error { error: String },
}

/// A payload counts as missing when it is absent or an "empty" JSON value:
/// `null`, `false`, zero, `""`, `[]` or `{}`.
pub fn is_missing_payload(payload: Option<&Value>) -> bool {
    match payload {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_join() {
        let json = r#"{"action": "join", "room": "r1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::Join { room } = msg {
            assert_eq!(room.as_deref(), Some("r1"));
        } else {
            panic!("Expected Join");
        }
    }

    #[test]
    fn parse_join_without_room() {
        let msg: ClientMessage = serde_json::from_str(r#"{"action": "join"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { room: None }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"action": "join", "room": null}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { room: None }));
    }

    #[test]
    fn parse_relay() {
        let json = r#"{"action": "relay", "room": "r1", "payload": {"sdp": "v=0"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::Relay { room, payload } = msg {
            assert_eq!(room.as_deref(), Some("r1"));
            assert_eq!(payload, Some(json!({"sdp": "v=0"})));
        } else {
            panic!("Expected Relay");
        }
    }

    #[test]
    fn parse_leave() {
        let msg: ClientMessage = serde_json::from_str(r#"{"action": "leave"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Leave { .. }));
    }

    #[test]
    fn parse_unknown_action() {
        let msg: ClientMessage = serde_json::from_str(r#"{"action": "dance"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"[1, 2]"#).is_err());
        assert!(ClientMessage::parse(r#""join""#).is_err());
        assert!(ClientMessage::parse(r#"{"action":"join","room":5}"#).is_err());
    }

    #[test]
    fn parse_treats_missing_or_non_string_action_as_unknown() {
        for text in [
            r#"{"room": "r1"}"#,
            r#"{"action": null}"#,
            r#"{"action": 0, "room": "r1"}"#,
            r#"{}"#,
        ] {
            let msg = ClientMessage::parse(text).unwrap();
            assert!(matches!(msg, ClientMessage::Unknown), "{text}");
        }
    }

    #[test]
    fn parse_keeps_payload_key_order() {
        let msg =
            ClientMessage::parse(r#"{"action":"relay","payload":{"z":1,"a":2}}"#).unwrap();
        if let ClientMessage::Relay { payload, .. } = msg {
            assert_eq!(
                serde_json::to_string(&payload.unwrap()).unwrap(),
                r#"{"z":1,"a":2}"#
            );
        } else {
            panic!("Expected Relay");
        }
    }

    #[test]
    fn serialize_joined() {
        let msg = ServerMessage::Joined {
            room: RoomId::from("r1"),
            peers: 1,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"action":"joined","room":"r1","peers":1}"#);
    }

    #[test]
    fn serialize_peer_joined() {
        let msg = ServerMessage::PeerJoined {
            room: RoomId::from("r1"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"action":"peer_joined","room":"r1"}"#);
    }

    #[test]
    fn serialize_relayed_preserves_payload_order() {
        let payload: Value = serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        let msg = ServerMessage::Relayed {
            room: RoomId::from("r1"),
            payload,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"action":"relayed","room":"r1","payload":{"type":"offer","sdp":"v=0"}}"#
        );
    }

    #[test]
    fn serialize_peer_left() {
        let msg = ServerMessage::PeerLeft {
            room: RoomId::from("r1"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"action":"peer_left","room":"r1"}"#);
    }

    #[test]
    fn serialize_error() {
        let msg = ServerMessage::Error {
            error: "Room is full (max 2 peers)".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"action":"error","error":"Room is full (max 2 peers)"}"#);
    }

    #[test]
    fn empty_payloads_are_missing() {
        assert!(is_missing_payload(None));
        for empty in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(is_missing_payload(Some(&empty)), "{empty} should be missing");
        }
        for present in [json!(true), json!(1), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(!is_missing_payload(Some(&present)), "{present} should be present");
        }
    }
}
