//! Session construction and the public handle.

use std::sync::Arc;

use chrono::Utc;
use murmur_proto::{MessageKind, PresenceStatus, ReplyPreview, RoomId, TempId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::broadcast::{HandlerError, SubscriberId, SubscriberRegistry, SubscriberStats};
use crate::config::SessionConfig;
use crate::dispatcher::{OutboundIntent, TempIdGenerator};
use crate::driver::{Command, SessionDriver, SessionSnapshot, SessionStats};
use crate::error::SessionError;
use crate::event::{ConnectionState, SessionEvent};
use crate::presence::{PresenceTracker, PresenceUpdate};
use crate::room_switch::Responder;
use crate::token::TokenProvider;

/// Session builder.
///
/// Built once by the application's composition root and turned into a
/// [`SessionHandle`] with [`spawn`](Self::spawn).
pub struct Session {
    config: SessionConfig,
    tokens: Arc<dyn TokenProvider>,
    presence: Option<watch::Receiver<PresenceUpdate>>,
}

impl Session {
    pub fn new(config: SessionConfig, tokens: impl TokenProvider + 'static) -> Self {
        Self {
            config,
            tokens: Arc::new(tokens),
            presence: None,
        }
    }

    /// Forward presence transitions from `tracker` as `presence_update` frames.
    pub fn with_presence(mut self, tracker: &PresenceTracker) -> Self {
        self.presence = Some(tracker.subscribe());
        self
    }

    /// Start the session driver on the current tokio runtime.
    ///
    /// The session starts disconnected; nothing is opened until
    /// [`SessionHandle::connect`] or [`SessionHandle::switch_room`]. The
    /// driver stops once every handle is dropped.
    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            state: ConnectionState::Disconnected,
            room: None,
        });
        let subscribers = Arc::new(SubscriberRegistry::new());

        let driver = SessionDriver::new(
            self.config,
            self.tokens,
            commands_rx,
            snapshot_tx,
            subscribers.clone(),
            self.presence,
        );
        tokio::spawn(driver.run());

        SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            subscribers,
            temp_ids: Arc::new(TempIdGenerator::new()),
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    subscribers: Arc<SubscriberRegistry>,
    temp_ids: Arc<TempIdGenerator>,
}

impl SessionHandle {
    // ───── lifecycle ─────

    /// Connect to `room`, or to the current room when `None`.
    ///
    /// With no room at all the session settles in [`ConnectionState::BaseView`]
    /// without opening a socket. Concurrent calls for the same room share
    /// one attempt.
    pub async fn connect(&self, room: Option<RoomId>) -> Result<(), SessionError> {
        self.request(|respond| Command::Connect { room, respond })
            .await
    }

    /// Make `room` the active room.
    ///
    /// Over an open socket this is a `room_switch` round trip; otherwise it
    /// connects straight to `room`.
    pub async fn switch_room(&self, room: RoomId) -> Result<(), SessionError> {
        self.request(|respond| Command::SwitchRoom { room, respond })
            .await
    }

    /// Close the socket normally. The current room is kept for a later
    /// `connect(None)`.
    pub async fn close(&self) {
        self.shutdown(false).await;
    }

    /// Close the socket and forget the current room.
    pub async fn enter_base_view(&self) {
        self.shutdown(true).await;
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn current_room(&self) -> Option<RoomId> {
        self.snapshot.borrow().room.clone()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    // ───── outbound ─────

    /// Send a chat message and return its temp id immediately.
    ///
    /// No acknowledgement is awaited; the server echoes the temp id in the
    /// confirming `message` frame. With the socket closed this fails with
    /// [`SessionError::NotConnected`], reports `SendFailed` to subscribers
    /// and triggers a reconnect.
    pub fn send_message(
        &self,
        content: impl Into<String>,
        message_type: MessageKind,
        reply_to: Option<ReplyPreview>,
    ) -> Result<TempId, SessionError> {
        let temp_id = self.temp_ids.next_id();
        if !self.is_open() {
            let _ = self.commands.send(Command::SendRejected { temp_id });
            return Err(SessionError::NotConnected);
        }
        self.commands
            .send(Command::Send(OutboundIntent::Message {
                temp_id: temp_id.clone(),
                content: content.into(),
                message_type,
                reply_to,
            }))
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(temp_id)
    }

    /// Typing indicator. Repeated `true` calls are throttled to one frame
    /// per typing window; `false` always goes out and resets the window.
    pub fn send_typing_status(&self, is_typing: bool) {
        self.send_intent(OutboundIntent::Typing(is_typing));
    }

    /// An empty id list sends nothing.
    pub fn send_read_receipt(&self, message_ids: Vec<String>) {
        self.send_intent(OutboundIntent::ReadReceipt(message_ids));
    }

    pub fn send_emoji_reaction(&self, message_id: impl Into<String>, emoji: impl Into<String>) {
        self.send_intent(OutboundIntent::Reaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        });
    }

    pub fn send_message_edit(&self, message_id: impl Into<String>, content: impl Into<String>) {
        self.send_intent(OutboundIntent::Edit {
            message_id: message_id.into(),
            content: content.into(),
        });
    }

    pub fn send_message_delete(&self, message_id: impl Into<String>) {
        self.send_intent(OutboundIntent::Delete {
            message_id: message_id.into(),
        });
    }

    pub fn send_presence(&self, status: PresenceStatus) {
        self.send_intent(OutboundIntent::Presence {
            status,
            last_active: Utc::now(),
        });
    }

    // ───── subscribers ─────

    /// Register a handler for every session event, in delivery order.
    pub fn add_message_handler<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&SessionEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribers.add(handler)
    }

    pub fn remove_message_handler(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn subscriber_stats(&self) -> SubscriberStats {
        self.subscribers.stats()
    }

    /// Inbound queue and heartbeat counters from the driver.
    pub async fn session_stats(&self) -> Result<SessionStats, SessionError> {
        let (respond, stats) = oneshot::channel();
        self.commands
            .send(Command::Stats { respond })
            .map_err(|_| SessionError::SessionClosed)?;
        stats.await.map_err(|_| SessionError::SessionClosed)
    }

    // ───── internals ─────

    /// Intents other than chat messages are dropped while closed.
    fn send_intent(&self, intent: OutboundIntent) {
        if !self.is_open() {
            log::debug!("Socket closed, dropping {intent:?}");
            return;
        }
        let _ = self.commands.send(Command::Send(intent));
    }

    async fn request(
        &self,
        build: impl FnOnce(Responder) -> Command,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    async fn shutdown(&self, forget_room: bool) {
        let (respond, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Close {
                forget_room,
                respond,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }
}
