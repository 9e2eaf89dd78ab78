//! Frame types and the JSON text codec.
//!
//! Every frame except the heartbeat literals is a JSON object discriminated
//! by its `type` field:
//!
//! ```text
//! client → server   {"type":"message","content":"hi","message_type":"text",
//!                    "room_id":"general","temp_id":"temp-1700000000000-1"}
//! server → client   {"type":"message","id":"9f…","temp_id":"temp-1700000000000-1",
//!                    "content":"hi","username":"ada","read_by":["ada"],…}
//! client → server   ping
//! server → client   pong
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{RoomId, TempId};

/// Liveness probe sent by the client as a bare text frame.
pub const HEARTBEAT_PROBE: &str = "ping";

/// Server reply to [`HEARTBEAT_PROBE`].
pub const HEARTBEAT_ACK: &str = "pong";

/// Kind of chat content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

/// Quoted message attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(alias = "id")]
    pub message_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub username: String,
}

// ───────────────────────────────────────────────────────────────────
// Client → server
// ───────────────────────────────────────────────────────────────────

/// Intent frames written by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        content: String,
        #[serde(default)]
        message_type: MessageKind,
        room_id: RoomId,
        temp_id: TempId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
    },
    TypingStatus {
        is_typing: bool,
    },
    ReadReceipt {
        message_ids: Vec<String>,
    },
    AddEmojiReaction {
        message_id: String,
        emoji: String,
    },
    EditMessage {
        message_id: String,
        content: String,
    },
    DeleteMessage {
        message_id: String,
    },
    PresenceUpdate {
        status: PresenceStatus,
        last_active: String,
    },
    RoomSwitch {
        room_id: RoomId,
    },
}

impl OutboundFrame {
    /// Wire name of the frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::TypingStatus { .. } => "typing_status",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::AddEmojiReaction { .. } => "add_emoji_reaction",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::RoomSwitch { .. } => "room_switch",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Server → client
// ───────────────────────────────────────────────────────────────────

/// A chat message as confirmed and broadcast by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Durable server-assigned id.
    pub id: String,
    /// Echo of the sender's placeholder id, if the sender supplied one.
    #[serde(default)]
    pub temp_id: Option<TempId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub read_by: Vec<String>,
}

/// One user's entry in a room presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    #[serde(default)]
    pub last_active: String,
}

/// Presence broadcast.
///
/// Either a full room snapshot (`presence`) or a single transition
/// (`user_id` + `status`), depending on what triggered it server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<BTreeMap<String, PresenceEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// Event frames written by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(ChatMessage),
    Image(ChatMessage),
    TypingStatus {
        #[serde(default)]
        username: String,
        is_typing: bool,
    },
    ReadReceipt {
        message_ids: Vec<String>,
        #[serde(default)]
        read_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    EmojiReaction {
        message_id: String,
        emoji: String,
        #[serde(default)]
        username: String,
    },
    MessageEdited {
        message_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edited_at: Option<String>,
    },
    MessageDeleted {
        message_id: String,
    },
    Presence(PresenceFrame),
    RoomSwitchSuccess {
        room_id: RoomId,
    },
    RoomSwitchError {
        room_id: RoomId,
        #[serde(default)]
        message: String,
    },
    Error {
        message: String,
    },
    /// Any `type` this client does not understand.
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Wire name of the frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Image(_) => "image",
            Self::TypingStatus { .. } => "typing_status",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::EmojiReaction { .. } => "emoji_reaction",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::Presence(_) => "presence",
            Self::RoomSwitchSuccess { .. } => "room_switch_success",
            Self::RoomSwitchError { .. } => "room_switch_error",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Key used to drop repeated deliveries of the same server event.
    ///
    /// Only frames that announce an entity exactly once carry a key: chat
    /// content (by durable id) and deletions. Edits, reactions and receipts
    /// may legitimately repeat for the same message id.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            Self::Message(msg) | Self::Image(msg) => Some(format!("message:{}", msg.id)),
            Self::MessageDeleted { message_id } => Some(format!("deleted:{message_id}")),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// A decoded text frame received by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HeartbeatAck,
    Frame(InboundFrame),
}

/// Decode one text frame from the server.
pub fn decode_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    if text == HEARTBEAT_ACK {
        return Ok(Inbound::HeartbeatAck);
    }
    InboundFrame::decode(text).map(Inbound::Frame)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[test]
    fn test_message_frame_wire_shape() {
        let frame = OutboundFrame::Message {
            content: "hello".into(),
            message_type: MessageKind::Text,
            room_id: room("general"),
            temp_id: TempId::new(1_700_000_000_000, 1),
            reply_to: None,
        };
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["content"], "hello");
        assert_eq!(value["message_type"], "text");
        assert_eq!(value["room_id"], "general");
        assert_eq!(value["temp_id"], "temp-1700000000000-1");
        assert!(value.get("reply_to").is_none());
    }

    #[test]
    fn test_outbound_type_tags() {
        let frames = [
            (OutboundFrame::TypingStatus { is_typing: true }, "typing_status"),
            (OutboundFrame::ReadReceipt { message_ids: vec!["a".into()] }, "read_receipt"),
            (
                OutboundFrame::AddEmojiReaction { message_id: "a".into(), emoji: "👍".into() },
                "add_emoji_reaction",
            ),
            (
                OutboundFrame::EditMessage { message_id: "a".into(), content: "b".into() },
                "edit_message",
            ),
            (OutboundFrame::DeleteMessage { message_id: "a".into() }, "delete_message"),
            (
                OutboundFrame::PresenceUpdate {
                    status: PresenceStatus::Away,
                    last_active: "2026-01-01T00:00:00.000Z".into(),
                },
                "presence_update",
            ),
            (OutboundFrame::RoomSwitch { room_id: room("r2") }, "room_switch"),
        ];

        for (frame, tag) in frames {
            let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
            assert_eq!(value["type"], tag);
            assert_eq!(frame.kind(), tag);
        }
    }

    #[test]
    fn test_outbound_message_defaults_when_decoding() {
        let frame = OutboundFrame::decode(
            r#"{"type":"message","content":"x","room_id":"r1","temp_id":"temp-1-1"}"#,
        )
        .unwrap();
        match frame {
            OutboundFrame::Message { message_type, reply_to, .. } => {
                assert_eq!(message_type, MessageKind::Text);
                assert!(reply_to.is_none());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_server_message() {
        let text = r#"{
            "type": "message",
            "message_type": "text",
            "id": "65f1",
            "temp_id": "temp-1-3",
            "content": "hi",
            "username": "ada",
            "timestamp": "2026-01-01T00:00:00",
            "room_id": "general",
            "room_name": "General",
            "reply_to": null,
            "read_by": ["u1"]
        }"#;

        match decode_inbound(text).unwrap() {
            Inbound::Frame(InboundFrame::Message(msg)) => {
                assert_eq!(msg.id, "65f1");
                assert_eq!(msg.temp_id, Some(TempId::from("temp-1-3".to_string())));
                assert_eq!(msg.read_by, vec!["u1".to_string()]);
                assert!(msg.reply_to.is_none());
            }
            other => panic!("expected message frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_reply_preview_accepts_id_alias() {
        let preview: ReplyPreview =
            serde_json::from_str(r#"{"id":"m1","content":"c","username":"u"}"#).unwrap();
        assert_eq!(preview.message_id, "m1");
    }

    #[test]
    fn test_decode_heartbeat_ack() {
        assert_eq!(decode_inbound("pong").unwrap(), Inbound::HeartbeatAck);
    }

    #[test]
    fn test_decode_room_switch_frames() {
        let ok = decode_inbound(r#"{"type":"room_switch_success","room_id":"r2"}"#).unwrap();
        assert_eq!(
            ok,
            Inbound::Frame(InboundFrame::RoomSwitchSuccess { room_id: room("r2") })
        );

        let err = decode_inbound(
            r#"{"type":"room_switch_error","room_id":"r3","message":"Room not found"}"#,
        )
        .unwrap();
        assert_eq!(
            err,
            Inbound::Frame(InboundFrame::RoomSwitchError {
                room_id: room("r3"),
                message: "Room not found".into(),
            })
        );
    }

    #[test]
    fn test_decode_presence_shapes() {
        let snapshot = decode_inbound(
            r#"{"type":"presence","presence":{"u1":{"status":"active","last_active":"t"}}}"#,
        )
        .unwrap();
        match snapshot {
            Inbound::Frame(InboundFrame::Presence(p)) => {
                let map = p.presence.unwrap();
                assert_eq!(map["u1"].status, PresenceStatus::Active);
            }
            other => panic!("unexpected {other:?}"),
        }

        let single = decode_inbound(
            r#"{"type":"presence","user_id":"u2","status":"offline","room_id":"r1"}"#,
        )
        .unwrap();
        match single {
            Inbound::Frame(InboundFrame::Presence(p)) => {
                assert_eq!(p.user_id.as_deref(), Some("u2"));
                assert_eq!(p.status, Some(PresenceStatus::Offline));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let frame = decode_inbound(r#"{"type":"something_new","x":1}"#).unwrap();
        assert_eq!(frame, Inbound::Frame(InboundFrame::Unknown));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            decode_inbound("{not json"),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_dedup_keys_are_namespaced() {
        let msg = InboundFrame::decode(r#"{"type":"image","id":"m1"}"#).unwrap();
        let deleted = InboundFrame::MessageDeleted { message_id: "m1".into() };
        let edited = InboundFrame::MessageEdited {
            message_id: "m1".into(),
            content: "x".into(),
            edited_at: None,
        };

        assert_eq!(msg.dedup_key().as_deref(), Some("message:m1"));
        assert_eq!(deleted.dedup_key().as_deref(), Some("deleted:m1"));
        assert_eq!(edited.dedup_key(), None);
    }
}
