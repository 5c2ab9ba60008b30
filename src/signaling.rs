//! WebSocket signaling relay for two-peer rooms

mod actor;
mod messages;
mod server;
mod types;

pub use actor::{RoomRegistry, RoomTable};
pub use messages::{ClientMessage, ServerMessage, is_missing_payload};
pub use server::SignalingServer;
pub use types::{
    ConnectionId, MAX_ROOM_PEERS, OutboundMessage, PeerSender, RoomId, SignalingError,
};
