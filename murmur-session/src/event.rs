//! Connection state and the events fanned out to subscribers.

use std::time::Duration;

use murmur_proto::{InboundFrame, RoomId, TempId};

/// Top-level connection state, as observed through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// No room selected and no connection desired.
    BaseView,
}

/// Connection transitions reported to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected {
        room_id: RoomId,
    },
    Disconnected {
        /// Close code, if the transport delivered one
        code: Option<u16>,
        reason: String,
        will_reconnect: bool,
        /// Attempt number the scheduled retry will use (or the last one tried)
        attempt: u32,
        retry_in: Option<Duration>,
    },
}

/// Events delivered to every registered subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(ConnectionStatus),
    /// The active room changed. `late` marks a switch confirmation that
    /// arrived after its caller had already timed out.
    RoomChanged {
        room_id: RoomId,
        late: bool,
    },
    Inbound(InboundFrame),
    SendFailed {
        temp_id: TempId,
        reason: String,
    },
}

impl SessionEvent {
    pub fn inbound(&self) -> Option<&InboundFrame> {
        match self {
            Self::Inbound(frame) => Some(frame),
            _ => None,
        }
    }
}
