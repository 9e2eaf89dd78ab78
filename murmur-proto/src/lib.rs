//! # murmur-proto — Wire protocol for murmur chat sessions
//!
//! JSON text frames over one persistent WebSocket per active room.
//!
//! ```text
//! ┌─────────────┐   OutboundFrame (JSON) + "ping"   ┌─────────────┐
//! │   Session   │ ─────────────────────────────────► │    Relay    │
//! │  (client)   │ ◄───────────────────────────────── │  (server)   │
//! └─────────────┘   InboundFrame (JSON) + "pong"    └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ids`] — validated room ids and client temp ids
//! - [`frames`] — outbound intents, inbound events, heartbeat literals

pub mod frames;
pub mod ids;

pub use frames::{
    decode_inbound, ChatMessage, Inbound, InboundFrame, MessageKind, OutboundFrame,
    PresenceEntry, PresenceFrame, PresenceStatus, ProtocolError, ReplyPreview, HEARTBEAT_ACK,
    HEARTBEAT_PROBE,
};
pub use ids::{RoomId, TempId};
