//! # murmur-session — Real-time chat session manager
//!
//! Keeps one WebSocket open to the chat server for the active room and
//! turns it into a typed event stream plus a set of fire-and-forget sends.
//!
//! ```text
//!             ┌──────────────────────── SessionDriver ────────────────────────┐
//!  connect ──►│ Link: Disconnected │ BaseView │ Connecting │ Connected        │
//!  switch  ──►│   ReconnectPolicy (1s,2s,4s… ≤30s)   HeartbeatMonitor ("ping")│
//!  send_*  ──►│   RoomSwitchCoordinator   Dispatcher (temp ids, throttling)   │
//!             │   InboundQueue + ProcessedMessageWindow ──► SubscriberRegistry│──► handlers
//!             └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`] — `Session` builder and the cloneable `SessionHandle`
//! - [`backoff`] — deterministic exponential reconnect delays
//! - [`room_switch`] — serialized, coalescing room-switch handshakes
//! - [`inbound`] / [`dedup`] — ordered inbound delivery with id-based dedup
//! - [`dispatcher`] — intent → frame conversion, temp ids, typing throttle
//! - [`broadcast`] — fault-isolated subscriber fan-out
//! - [`presence`] — local active/away/offline tracking
//!
//! Reference: RFC 6455 §7.4 — WebSocket close codes

pub mod backoff;
pub mod broadcast;
pub mod config;
pub mod dedup;
pub mod dispatcher;
mod driver;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod inbound;
pub mod presence;
pub mod room_switch;
pub mod session;
pub mod token;

pub use broadcast::{HandlerError, SubscriberId, SubscriberStats};
pub use config::{ReconnectConfig, SessionConfig};
pub use driver::{SessionSnapshot, SessionStats};
pub use error::SessionError;
pub use event::{ConnectionState, ConnectionStatus, SessionEvent};
pub use presence::{PresenceTracker, PresenceUpdate};
pub use session::{Session, SessionHandle};
pub use token::{StaticToken, TokenProvider};
