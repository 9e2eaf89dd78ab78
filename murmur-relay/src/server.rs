//! WebSocket chat relay.
//!
//! Architecture:
//! ```text
//! Client A ──┐  /ws/{token}/{room}
//!            ├── RoomRegistry ── room "general" ── broadcast::Sender<Envelope>
//! Client B ──┘        │                                  │
//!                     └── room "random" ─── …            ├──► Client A
//!                                                        └──► Client B
//! ```
//!
//! Each connection is one task that multiplexes:
//! - frames from its socket (intents, `ping`)
//! - envelopes from its current room
//! - delayed room-switch completions
//! - admin commands from the [`RelayHandle`]
//!
//! Invalid tokens or rooms are accepted at the WebSocket level and then
//! closed with 1008 (policy violation).

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use murmur_proto::{
    ChatMessage, InboundFrame, OutboundFrame, PresenceFrame, PresenceStatus, RoomId,
    HEARTBEAT_ACK, HEARTBEAT_PROBE,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::error::RelayError;
use crate::rooms::{Envelope, RoomRegistry};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Rooms clients may join (None = any valid room id)
    pub rooms: Option<HashSet<String>>,
    /// Accepted auth tokens (None = any non-empty token)
    pub tokens: Option<HashSet<String>>,
    /// Hold `room_switch_success` back for this long
    pub switch_ack_delay: Option<Duration>,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            rooms: None,
            tokens: None,
            switch_ack_delay: None,
            broadcast_capacity: 256,
        }
    }
}

impl RelayConfig {
    fn room_allowed(&self, room: &RoomId) -> bool {
        self.rooms
            .as_ref()
            .map_or(true, |rooms| rooms.contains(room.as_str()))
    }

    fn token_allowed(&self, token: &str) -> bool {
        !token.is_empty()
            && self
                .tokens
                .as_ref()
                .map_or(true, |tokens| tokens.contains(token))
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub pings: u64,
    /// Client frames received, keyed by `type`
    pub frames: BTreeMap<String, u64>,
}

impl RelayStats {
    pub fn frames_of(&self, kind: &str) -> u64 {
        self.frames.get(kind).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    pings: AtomicU64,
    frames: Mutex<BTreeMap<String, u64>>,
}

impl AtomicRelayStats {
    fn record_frame(&self, kind: &str) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        *frames.entry(kind.to_string()).or_insert(0) += 1;
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            frames: self
                .frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AdminCommand {
    CloseAll(u16),
    DropAll,
    Shutdown,
}

struct Shared {
    config: RelayConfig,
    rooms: RoomRegistry,
    stats: AtomicRelayStats,
    admin: broadcast::Sender<AdminCommand>,
}

/// The relay server.
pub struct RelayServer {
    shared: Arc<Shared>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let (admin, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                rooms: RoomRegistry::new(config.broadcast_capacity),
                stats: AtomicRelayStats::default(),
                admin,
                config,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind and serve in the background.
    pub async fn listen(self) -> Result<RelayHandle, RelayError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Relay listening on {local_addr}");

        let task = tokio::spawn(accept_loop(listener, self.shared.clone()));
        Ok(RelayHandle {
            local_addr,
            shared: self.shared,
            task,
        })
    }

    /// Bind and serve until shut down.
    pub async fn run(self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        accept_loop(listener, self.shared).await
    }
}

/// Control surface for a relay started with [`RelayServer::listen`].
pub struct RelayHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<Result<(), RelayError>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for clients, without the `/ws/...` suffix.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn stats(&self) -> RelayStats {
        self.shared.stats.snapshot()
    }

    /// Deliver a raw text frame to everyone in `room`.
    pub async fn inject(&self, room: &str, text: impl Into<String>) -> usize {
        self.shared
            .rooms
            .broadcast(room, Envelope::to_all(text.into()))
            .await
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.shared.rooms.member_count(room).await
    }

    /// Close every connection with `code`.
    pub fn close_all(&self, code: u16) {
        let _ = self.shared.admin.send(AdminCommand::CloseAll(code));
    }

    /// Drop every connection without a close frame.
    pub fn drop_all(&self) {
        let _ = self.shared.admin.send(AdminCommand::DropAll);
    }

    /// Stop accepting and close every connection with 1001.
    pub async fn shutdown(self) {
        let _ = self.shared.admin.send(AdminCommand::Shutdown);
        match self.task.await {
            Ok(Err(e)) => log::error!("Relay stopped with error: {e}"),
            Err(e) => log::error!("Relay task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) -> Result<(), RelayError> {
    let mut admin = shared.admin.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                log::debug!("New TCP connection from {addr}");
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, shared).await {
                        log::warn!("Connection error from {addr}: {e}");
                    }
                });
            }
            cmd = admin.recv() => match cmd {
                Ok(AdminCommand::Shutdown) | Err(RecvError::Closed) => {
                    log::info!("Relay shutting down");
                    return Ok(());
                }
                _ => {}
            },
        }
    }
}

/// Split `/ws/{token}/{room_id}` into its parts, percent-decoding each.
pub fn parse_socket_path(path: &str) -> Result<(String, RoomId), RelayError> {
    let invalid = || RelayError::InvalidPath(path.to_string());
    let mut parts = path.trim_start_matches('/').split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("ws"), Some(token), Some(room), None) if !token.is_empty() => {
            let token = percent_decode_str(token)
                .decode_utf8()
                .map_err(|_| invalid())?;
            let room = percent_decode_str(room)
                .decode_utf8()
                .map_err(|_| invalid())?;
            Ok((token.into_owned(), RoomId::new(room.into_owned())?))
        }
        _ => Err(invalid()),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn reject(
    mut ws: WebSocketStream<TcpStream>,
    shared: &Shared,
    reason: &'static str,
) -> Result<(), RelayError> {
    shared
        .stats
        .rejected_connections
        .fetch_add(1, Ordering::Relaxed);
    log::warn!("Rejecting connection: {reason}");
    ws.close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: reason.into(),
    }))
    .await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), RelayError> {
    let mut path = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await?;

    shared
        .stats
        .total_connections
        .fetch_add(1, Ordering::Relaxed);

    let (token, room) = match parse_socket_path(&path) {
        Ok(parts) => parts,
        Err(RelayError::Protocol(_)) => return reject(ws, &shared, "Invalid room").await,
        Err(_) => return reject(ws, &shared, "Invalid path").await,
    };
    if !shared.config.token_allowed(&token) {
        return reject(ws, &shared, "Invalid token").await;
    }
    if !shared.config.room_allowed(&room) {
        return reject(ws, &shared, "Invalid room").await;
    }

    log::info!("{addr} joined room {room}");
    shared
        .stats
        .active_connections
        .fetch_add(1, Ordering::Relaxed);

    let mut peer = Peer {
        id: Uuid::new_v4(),
        username: token,
        room,
        shared: shared.clone(),
    };
    let result = peer.serve(ws).await;

    shared
        .stats
        .active_connections
        .fetch_sub(1, Ordering::Relaxed);
    log::info!("{addr} left room {}", peer.room);
    result
}

enum Exit {
    /// Peer went away on its own
    Gone,
    Close(u16, &'static str),
    Drop,
}

/// One connected client.
struct Peer {
    id: Uuid,
    username: String,
    room: RoomId,
    shared: Arc<Shared>,
}

impl Peer {
    async fn serve(&mut self, ws: WebSocketStream<TcpStream>) -> Result<(), RelayError> {
        let (mut sink, mut source) = ws.split();
        let mut room_rx = self.enter_room().await;
        let mut admin = self.shared.admin.subscribe();
        let (switch_tx, mut switch_rx) = mpsc::unbounded_channel::<RoomId>();

        let exit = loop {
            tokio::select! {
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.handle_text(text.as_str(), &switch_tx).await {
                            if sink.send(Message::text(reply)).await.is_err() {
                                break Exit::Gone;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Exit::Gone,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Read error from peer {}: {e}", self.id);
                        break Exit::Gone;
                    }
                },
                envelope = room_rx.recv() => match envelope {
                    Ok(envelope) => {
                        if envelope.skip == Some(self.id) {
                            continue;
                        }
                        if sink.send(Message::text(envelope.text.clone())).await.is_err() {
                            break Exit::Gone;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Peer {} lagged, {n} frames dropped", self.id);
                    }
                    Err(RecvError::Closed) => break Exit::Gone,
                },
                Some(target) = switch_rx.recv() => {
                    room_rx = self.complete_switch(target, room_rx).await;
                    let ack = InboundFrame::RoomSwitchSuccess { room_id: self.room.clone() };
                    if send_frame(&mut sink, &ack).await.is_err() {
                        break Exit::Gone;
                    }
                }
                cmd = admin.recv() => match cmd {
                    Ok(AdminCommand::CloseAll(code)) => break Exit::Close(code, "closed by relay"),
                    Ok(AdminCommand::DropAll) => break Exit::Drop,
                    Ok(AdminCommand::Shutdown) => break Exit::Close(1001, "relay shutting down"),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break Exit::Gone,
                },
            }
        };

        self.leave_room().await;

        match exit {
            Exit::Close(code, reason) => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                sink.send(Message::Close(Some(frame))).await?;
                let _ = sink.close().await;
            }
            Exit::Drop => {
                log::debug!("Dropping peer {} without close frame", self.id);
                drop(sink);
                drop(source);
            }
            Exit::Gone => {}
        }
        Ok(())
    }

    /// Handle one client text frame, returning a direct reply if any.
    async fn handle_text(
        &self,
        text: &str,
        switch_tx: &mpsc::UnboundedSender<RoomId>,
    ) -> Option<String> {
        if text == HEARTBEAT_PROBE {
            self.shared.stats.pings.fetch_add(1, Ordering::Relaxed);
            return Some(HEARTBEAT_ACK.to_string());
        }

        let frame = match OutboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Bad frame from peer {}: {e}", self.id);
                return encode(&InboundFrame::Error {
                    message: "Invalid message format".into(),
                });
            }
        };
        self.shared.stats.record_frame(frame.kind());

        match frame {
            OutboundFrame::Message {
                content,
                message_type,
                temp_id,
                reply_to,
                ..
            } => {
                let message = ChatMessage {
                    id: Uuid::new_v4().simple().to_string(),
                    temp_id: Some(temp_id),
                    content,
                    message_type,
                    username: self.username.clone(),
                    timestamp: now_rfc3339(),
                    room_id: self.room.to_string(),
                    room_name: Some(self.room.to_string()),
                    reply_to,
                    read_by: vec![self.username.clone()],
                };
                self.to_room(&InboundFrame::Message(message), true).await;
            }
            OutboundFrame::TypingStatus { is_typing } => {
                let frame = InboundFrame::TypingStatus {
                    username: self.username.clone(),
                    is_typing,
                };
                self.to_room(&frame, false).await;
            }
            OutboundFrame::ReadReceipt { message_ids } => {
                if !message_ids.is_empty() {
                    let frame = InboundFrame::ReadReceipt {
                        message_ids,
                        read_by: self.username.clone(),
                        room_id: Some(self.room.to_string()),
                    };
                    self.to_room(&frame, true).await;
                }
            }
            OutboundFrame::AddEmojiReaction { message_id, emoji } => {
                let frame = InboundFrame::EmojiReaction {
                    message_id,
                    emoji,
                    username: self.username.clone(),
                };
                self.to_room(&frame, true).await;
            }
            OutboundFrame::EditMessage {
                message_id,
                content,
            } => {
                let frame = InboundFrame::MessageEdited {
                    message_id,
                    content,
                    edited_at: Some(now_rfc3339()),
                };
                self.to_room(&frame, true).await;
            }
            OutboundFrame::DeleteMessage { message_id } => {
                self.to_room(&InboundFrame::MessageDeleted { message_id }, true)
                    .await;
            }
            OutboundFrame::PresenceUpdate {
                status,
                last_active,
            } => {
                self.shared
                    .rooms
                    .set_presence(self.room.as_str(), self.id, status, last_active)
                    .await;
                self.announce_status(status).await;
            }
            OutboundFrame::RoomSwitch { room_id } => {
                if !self.shared.config.room_allowed(&room_id) {
                    return encode(&InboundFrame::RoomSwitchError {
                        room_id,
                        message: "Room not found".into(),
                    });
                }
                match self.shared.config.switch_ack_delay {
                    Some(delay) => {
                        let tx = switch_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(room_id);
                        });
                    }
                    None => {
                        let _ = switch_tx.send(room_id);
                    }
                }
            }
        }
        None
    }

    async fn enter_room(&self) -> broadcast::Receiver<Arc<Envelope>> {
        let rx = self
            .shared
            .rooms
            .join(self.room.as_str(), self.id, &self.username, now_rfc3339())
            .await;
        let snapshot = self.shared.rooms.presence_snapshot(self.room.as_str()).await;
        let frame = InboundFrame::Presence(PresenceFrame {
            presence: Some(snapshot),
            ..PresenceFrame::default()
        });
        self.to_room(&frame, true).await;
        rx
    }

    async fn leave_room(&self) {
        if self
            .shared
            .rooms
            .leave(self.room.as_str(), self.id)
            .await
            .is_some()
        {
            self.announce_status(PresenceStatus::Offline).await;
        }
    }

    async fn complete_switch(
        &mut self,
        target: RoomId,
        current_rx: broadcast::Receiver<Arc<Envelope>>,
    ) -> broadcast::Receiver<Arc<Envelope>> {
        if target == self.room {
            return current_rx;
        }
        drop(current_rx);
        self.leave_room().await;
        log::info!("Peer {} switched {} -> {target}", self.id, self.room);
        self.room = target;
        self.enter_room().await
    }

    async fn announce_status(&self, status: PresenceStatus) {
        let frame = InboundFrame::Presence(PresenceFrame {
            user_id: Some(self.username.clone()),
            status: Some(status),
            room_id: Some(self.room.to_string()),
            presence: None,
        });
        self.to_room(&frame, true).await;
    }

    async fn to_room(&self, frame: &InboundFrame, include_self: bool) {
        let Some(text) = encode(frame) else {
            return;
        };
        let envelope = if include_self {
            Envelope::to_all(text)
        } else {
            Envelope::to_others(self.id, text)
        };
        self.shared
            .rooms
            .broadcast(self.room.as_str(), envelope)
            .await;
    }
}

fn encode(frame: &InboundFrame) -> Option<String> {
    match frame.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            log::error!("Failed to encode {} frame: {e}", frame.kind());
            None
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &InboundFrame) -> Result<(), RelayError> {
    if let Some(text) = encode(frame) {
        sink.send(Message::text(text)).await?;
    }
    Ok(())
}
