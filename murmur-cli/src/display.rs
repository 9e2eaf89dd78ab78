//! One-line terminal rendering of session events.

use murmur_proto::{InboundFrame, MessageKind};
use murmur_session::{ConnectionStatus, SessionEvent, SessionStats};

/// Text to print for `event`, or `None` for events the terminal ignores.
pub fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Status(ConnectionStatus::Connected { room_id }) => {
            Some(format!("* connected to #{room_id}"))
        }
        SessionEvent::Status(ConnectionStatus::Disconnected {
            code,
            reason,
            will_reconnect,
            attempt,
            retry_in,
        }) => {
            let code = code.map_or_else(|| "-".to_string(), |c| c.to_string());
            let tail = match (will_reconnect, retry_in) {
                (true, Some(delay)) => format!(", retry {attempt} in {delay:?}"),
                _ => String::new(),
            };
            Some(format!("* disconnected ({code} {reason}){tail}"))
        }
        SessionEvent::RoomChanged { room_id, late } => Some(if *late {
            format!("* now in #{room_id} (late confirmation)")
        } else {
            format!("* now in #{room_id}")
        }),
        SessionEvent::SendFailed { temp_id, reason } => {
            Some(format!("! message {temp_id} not sent: {reason}"))
        }
        SessionEvent::Inbound(frame) => describe_frame(frame),
    }
}

pub fn describe_stats(stats: &SessionStats) -> String {
    let ack = stats
        .since_last_ack
        .map_or_else(|| "no ack yet".to_string(), |d| format!("last ack {}s ago", d.as_secs()));
    format!(
        "* {} queued, {} duplicates dropped, {} heartbeats ({ack})",
        stats.inbound_pending, stats.duplicates_dropped, stats.heartbeats_sent
    )
}

fn describe_frame(frame: &InboundFrame) -> Option<String> {
    match frame {
        InboundFrame::Message(msg) | InboundFrame::Image(msg) => {
            let body = match msg.message_type {
                MessageKind::Text => msg.content.clone(),
                MessageKind::Image => format!("[image] {}", msg.content),
            };
            let reply = msg
                .reply_to
                .as_ref()
                .map(|r| format!(" (re {}: {})", r.username, r.content))
                .unwrap_or_default();
            Some(format!("[{}] <{}>{reply} {body}", msg.id, msg.username))
        }
        InboundFrame::TypingStatus {
            username,
            is_typing: true,
        } => Some(format!("  {username} is typing...")),
        InboundFrame::TypingStatus { .. } => None,
        InboundFrame::ReadReceipt {
            message_ids,
            read_by,
            ..
        } => Some(format!("  {read_by} read {}", message_ids.join(", "))),
        InboundFrame::EmojiReaction {
            message_id,
            emoji,
            username,
        } => Some(format!("  {username} reacted {emoji} to {message_id}")),
        InboundFrame::MessageEdited {
            message_id,
            content,
            ..
        } => Some(format!("[{message_id}] (edited) {content}")),
        InboundFrame::MessageDeleted { message_id } => {
            Some(format!("[{message_id}] (deleted)"))
        }
        InboundFrame::Presence(presence) => match (&presence.user_id, presence.status) {
            (Some(user), Some(status)) => Some(format!("  {user} is {}", status.as_str())),
            _ => presence.presence.as_ref().map(|all| {
                let users: Vec<&str> = all.keys().map(String::as_str).collect();
                format!("  here: {}", users.join(", "))
            }),
        },
        InboundFrame::Error { message } => Some(format!("! server: {message}")),
        InboundFrame::RoomSwitchSuccess { .. }
        | InboundFrame::RoomSwitchError { .. }
        | InboundFrame::Unknown => None,
    }
}
