//! Outbound dispatcher: typed intents → wire frames.
//!
//! The dispatcher owns temp id generation and the typing throttle. It never
//! touches the socket; the session driver writes whatever frame it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use murmur_proto::{MessageKind, OutboundFrame, PresenceStatus, ReplyPreview, RoomId, TempId};
use tokio::time::Instant;

/// Something the application wants to tell the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundIntent {
    Message {
        temp_id: TempId,
        content: String,
        message_type: MessageKind,
        reply_to: Option<ReplyPreview>,
    },
    /// `true` is throttled: at most one per `typing_window`, leading edge.
    Typing(bool),
    ReadReceipt(Vec<String>),
    Reaction {
        message_id: String,
        emoji: String,
    },
    Edit {
        message_id: String,
        content: String,
    },
    Delete {
        message_id: String,
    },
    Presence {
        status: PresenceStatus,
        last_active: DateTime<Utc>,
    },
    RoomSwitch(RoomId),
}

/// Process-wide temp id source: `temp-<unix millis>-<counter>`.
///
/// The counter is monotonic, so ids are unique within a process even when
/// two are minted in the same millisecond.
#[derive(Debug, Default)]
pub struct TempIdGenerator {
    counter: AtomicU64,
}

impl TempIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TempId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TempId::new(Utc::now().timestamp_millis(), sequence)
    }
}

/// Converts intents into frames, applying the per-intent send rules.
pub struct Dispatcher {
    typing_window: Duration,
    last_typing_sent: Option<Instant>,
}

impl Dispatcher {
    pub fn new(typing_window: Duration) -> Self {
        Self {
            typing_window,
            last_typing_sent: None,
        }
    }

    /// Build the frame for `intent`, or `None` if nothing should be sent.
    ///
    /// `room` is the room the socket is bound to; chat messages are stamped
    /// with it.
    pub fn prepare(
        &mut self,
        intent: OutboundIntent,
        room: &RoomId,
        now: Instant,
    ) -> Option<OutboundFrame> {
        match intent {
            OutboundIntent::Message {
                temp_id,
                content,
                message_type,
                reply_to,
            } => Some(OutboundFrame::Message {
                content,
                message_type,
                room_id: room.clone(),
                temp_id,
                reply_to,
            }),
            OutboundIntent::Typing(true) => {
                if let Some(last) = self.last_typing_sent {
                    if now.duration_since(last) < self.typing_window {
                        log::trace!("Typing indicator throttled");
                        return None;
                    }
                }
                self.last_typing_sent = Some(now);
                Some(OutboundFrame::TypingStatus { is_typing: true })
            }
            OutboundIntent::Typing(false) => {
                self.last_typing_sent = None;
                Some(OutboundFrame::TypingStatus { is_typing: false })
            }
            OutboundIntent::ReadReceipt(message_ids) => {
                if message_ids.is_empty() {
                    return None;
                }
                Some(OutboundFrame::ReadReceipt { message_ids })
            }
            OutboundIntent::Reaction { message_id, emoji } => {
                Some(OutboundFrame::AddEmojiReaction { message_id, emoji })
            }
            OutboundIntent::Edit {
                message_id,
                content,
            } => Some(OutboundFrame::EditMessage {
                message_id,
                content,
            }),
            OutboundIntent::Delete { message_id } => {
                Some(OutboundFrame::DeleteMessage { message_id })
            }
            OutboundIntent::Presence {
                status,
                last_active,
            } => Some(OutboundFrame::PresenceUpdate {
                status,
                last_active: last_active.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            OutboundIntent::RoomSwitch(room_id) => Some(OutboundFrame::RoomSwitch { room_id }),
        }
    }

    /// Forget throttle state; called whenever a new link opens.
    pub fn reset(&mut self) {
        self.last_typing_sent = None;
    }
}
