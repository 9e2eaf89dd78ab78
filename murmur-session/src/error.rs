//! Session error taxonomy.

use std::time::Duration;

use murmur_proto::{ProtocolError, RoomId};

/// Errors surfaced to callers of the session handle.
///
/// `Clone` so a single failure can reject every waiter of a shared attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("no auth token available")]
    NotAuthenticated,

    #[error("socket is not open")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("room switch to {0} timed out")]
    SwitchTimeout(RoomId),

    #[error("room switch to {room} rejected: {message}")]
    SwitchRejected { room: RoomId, message: String },

    #[error("room switch to {room} superseded by {by}")]
    SwitchSuperseded { room: RoomId, by: RoomId },

    #[error("operation cancelled")]
    Cancelled,

    #[error("session closed")]
    SessionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
