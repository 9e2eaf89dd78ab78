//! Identifiers shared by client and server.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::frames::ProtocolError;

/// Longest room id accepted on the wire.
const MAX_ROOM_ID_LEN: usize = 128;

/// A chat room identifier.
///
/// Room ids travel as a URL path segment (`/ws/{token}/{room_id}`), so they
/// must be non-empty and free of `/` and whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_ROOM_ID_LEN
            && !id.chars().any(|c| c == '/' || c.is_whitespace());
        if valid {
            Ok(Self(id))
        } else {
            Err(ProtocolError::InvalidRoomId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated placeholder id for a chat message.
///
/// The server echoes it back as `temp_id` in the confirming `message` frame,
/// next to the durable `id` it assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Build the canonical `temp-<unix millis>-<sequence>` form.
    pub fn new(unix_millis: i64, sequence: u64) -> Self {
        Self(format!("temp-{unix_millis}-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TempId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
