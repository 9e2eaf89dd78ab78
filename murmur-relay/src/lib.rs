//! # murmur-relay — Loopback chat relay
//!
//! Server side of the murmur wire protocol: token/room checks on the socket
//! path, per-room fan-out, message id assignment with `temp_id` echo, room
//! switching and `ping`/`pong`. Used by the session integration tests and for
//! local development.
//!
//! ## Modules
//!
//! - [`server`] — listener, per-connection task, admin handle, stats
//! - [`rooms`] — room membership, broadcast channels, presence map
//! - [`error`] — `RelayError`

pub mod error;
pub mod rooms;
pub mod server;

pub use error::RelayError;
pub use server::{RelayConfig, RelayHandle, RelayServer, RelayStats};
