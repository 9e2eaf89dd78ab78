//! Session timing and connection configuration.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but RFC 3986 unreserved characters is escaped in a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Reconnection budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Attempts scheduled after an unexpected close before giving up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub cap_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket base URL; `/ws/{token}/{room_id}` is appended per attempt
    pub server_url: String,
    /// Abort an attempt that has not opened within this window
    pub connect_timeout: Duration,
    /// Period between `ping` probes while connected
    pub heartbeat_interval: Duration,
    /// Reject a room switch with no server answer after this long
    pub switch_timeout: Duration,
    /// Inbound queue drain period
    pub drain_interval: Duration,
    /// Number of recent message ids remembered for dedup
    pub dedup_capacity: usize,
    /// Minimum spacing between `typing_status{is_typing:true}` frames
    pub typing_window: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            switch_timeout: Duration::from_secs(5),
            drain_interval: Duration::from_millis(50),
            dedup_capacity: 1000,
            typing_window: Duration::from_millis(300),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration pointed at `server_url` with default timings.
    pub fn with_server(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Full socket URL for one connection attempt.
    ///
    /// Token and room are percent-encoded, so a token containing `/`, `?` or
    /// `#` still lands in its own path segment.
    pub fn socket_url(&self, token: &str, room_id: &str) -> String {
        format!(
            "{}/ws/{}/{}",
            self.server_url.trim_end_matches('/'),
            utf8_percent_encode(token, PATH_SEGMENT),
            utf8_percent_encode(room_id, PATH_SEGMENT)
        )
    }
}
