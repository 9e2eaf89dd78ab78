//! The session actor.
//!
//! One task owns every piece of mutable session state. Everything else talks
//! to it through channels:
//!
//! ```text
//!  SessionHandle ──Command──►┐
//!                            │      ┌─────────────── select! ───────────────┐
//!  attempt task ──LinkEvent──┤      │ commands · link events · drain tick   │
//!  reader task  ──LinkEvent──┼────► │ heartbeat · reconnect · switch expiry │
//!                            │      │ presence changes                      │
//!  PresenceTracker ──watch──►┘      └───────────────────────────────────────┘
//!                                        │                    │
//!                                   socket writes       SubscriberRegistry
//! ```
//!
//! Link events carry the id of the link that produced them. Anything from a
//! link other than the current one is ignored, which is how a replaced socket
//! is detached without racing its own close notification.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_proto::{
    decode_inbound, Inbound, InboundFrame, OutboundFrame, RoomId, TempId, HEARTBEAT_PROBE,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use crate::broadcast::SubscriberRegistry;
use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, OutboundIntent};
use crate::error::SessionError;
use crate::event::{ConnectionState, ConnectionStatus, SessionEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::inbound::InboundQueue;
use crate::presence::PresenceUpdate;
use crate::room_switch::{Responder, RoomSwitchCoordinator, SwitchAction};
use crate::token::TokenProvider;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const NORMAL_CLOSURE: u16 = 1000;
const ABNORMAL_CLOSURE: u16 = 1006;
const HEARTBEAT_FAILURE: u16 = 4000;

/// State published to handles after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub room: Option<RoomId>,
}

/// Driver-side counters, read on demand through
/// [`SessionHandle::session_stats`](crate::SessionHandle::session_stats).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames decoded but not yet delivered
    pub inbound_pending: usize,
    /// Inbound frames dropped as already processed
    pub duplicates_dropped: u64,
    /// Heartbeats sent on the current socket
    pub heartbeats_sent: u64,
    /// Time since the last heartbeat ack on the current socket
    pub since_last_ack: Option<Duration>,
}

pub(crate) enum Command {
    Connect {
        room: Option<RoomId>,
        respond: Responder,
    },
    SwitchRoom {
        room: RoomId,
        respond: Responder,
    },
    Send(OutboundIntent),
    /// `send_message` found the socket closed.
    SendRejected {
        temp_id: TempId,
    },
    Close {
        forget_room: bool,
        respond: oneshot::Sender<()>,
    },
    Stats {
        respond: oneshot::Sender<SessionStats>,
    },
}

enum LinkEvent {
    Opened { link: Uuid, stream: Box<WsStream> },
    Failed { link: Uuid, error: SessionError },
    Frame { link: Uuid, text: String },
    Closed { link: Uuid, code: Option<u16>, reason: String },
}

/// One connection attempt; every concurrent `connect` for the same room
/// waits on it.
struct Attempt {
    id: Uuid,
    room: RoomId,
    task: JoinHandle<()>,
    waiters: Vec<Responder>,
}

/// An open socket and everything whose lifetime is bound to it.
struct Connection {
    id: Uuid,
    room: RoomId,
    sink: WsSink,
    reader: JoinHandle<()>,
    heartbeat: HeartbeatMonitor,
}

impl Connection {
    /// Stop listening to the socket and hand back the writer.
    fn detach(self) -> WsSink {
        self.reader.abort();
        self.sink
    }
}

enum Link {
    Disconnected,
    BaseView,
    Connecting(Attempt),
    Connected(Connection),
}

impl Link {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::BaseView => ConnectionState::BaseView,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Connected(_) => ConnectionState::Connected,
        }
    }
}

pub(crate) struct SessionDriver {
    config: SessionConfig,
    tokens: Arc<dyn TokenProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    subscribers: Arc<SubscriberRegistry>,
    presence: Option<watch::Receiver<PresenceUpdate>>,

    link: Link,
    current_room: Option<RoomId>,
    policy: ReconnectPolicy,
    reconnect_at: Option<Instant>,
    switches: RoomSwitchCoordinator,
    inbound: InboundQueue,
    dispatcher: Dispatcher,
    drain: Interval,
}

impl SessionDriver {
    pub(crate) fn new(
        config: SessionConfig,
        tokens: Arc<dyn TokenProvider>,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshot: watch::Sender<SessionSnapshot>,
        subscribers: Arc<SubscriberRegistry>,
        presence: Option<watch::Receiver<PresenceUpdate>>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let mut drain = tokio::time::interval(config.drain_interval);
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            switches: RoomSwitchCoordinator::new(config.switch_timeout),
            inbound: InboundQueue::new(config.dedup_capacity),
            dispatcher: Dispatcher::new(config.typing_window),
            config,
            tokens,
            commands,
            link_tx,
            link_rx,
            snapshot,
            subscribers,
            presence,
            link: Link::Disconnected,
            current_room: None,
            reconnect_at: None,
            drain,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let drain_ready = !self.inbound.is_empty();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,
                _ = self.drain.tick(), if drain_ready => self.drain_inbound(),
                _ = heartbeat_due(&mut self.link) => self.send_probe().await,
                _ = sleep_until_opt(self.reconnect_at) => self.on_reconnect_timer(),
                _ = sleep_until_opt(self.switches.next_deadline()) => self.expire_switches().await,
                changed = presence_changed(&mut self.presence) => match changed {
                    Some(update) => self.dispatch(OutboundIntent::Presence {
                        status: update.status,
                        last_active: update.last_active,
                    }).await,
                    None => self.presence = None,
                },
            }
        }

        self.detach_link(SessionError::SessionClosed);
        self.switches.fail_all(SessionError::SessionClosed);
        log::debug!("Session driver stopped");
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { room, respond } => self.connect(room, respond),
            Command::SwitchRoom { room, respond } => self.switch_room(room, respond).await,
            Command::Send(intent) => self.dispatch(intent).await,
            Command::SendRejected { temp_id } => {
                self.emit(SessionEvent::SendFailed {
                    temp_id,
                    reason: SessionError::NotConnected.to_string(),
                });
                self.reconnect_now();
            }
            Command::Close {
                forget_room,
                respond,
            } => {
                self.close(forget_room);
                let _ = respond.send(());
            }
            Command::Stats { respond } => {
                let _ = respond.send(self.stats());
            }
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            inbound_pending: self.inbound.len(),
            duplicates_dropped: self.inbound.duplicates_dropped(),
            ..SessionStats::default()
        };
        if let Link::Connected(conn) = &self.link {
            stats.heartbeats_sent = conn.heartbeat.probes_sent();
            stats.since_last_ack = conn.heartbeat.last_ack().map(|at| at.elapsed());
        }
        stats
    }

    fn connect(&mut self, room: Option<RoomId>, respond: Responder) {
        let Some(room) = room.or_else(|| self.current_room.clone()) else {
            self.detach_link(SessionError::Cancelled);
            self.link = Link::BaseView;
            self.publish();
            let _ = respond.send(Ok(()));
            return;
        };

        self.policy.reset();

        match &mut self.link {
            Link::Connecting(attempt) if attempt.room == room => {
                log::debug!("Joining in-flight connection attempt to {room}");
                attempt.waiters.push(respond);
                return;
            }
            Link::Connected(_) if self.current_room.as_ref() == Some(&room) => {
                let _ = respond.send(Ok(()));
                return;
            }
            _ => {}
        }

        self.detach_link(SessionError::Cancelled);
        self.switches.fail_all(SessionError::Cancelled);
        self.current_room = Some(room.clone());
        self.start_attempt(room, vec![respond]);
    }

    async fn switch_room(&mut self, room: RoomId, respond: Responder) {
        match &self.link {
            Link::Disconnected | Link::BaseView => self.connect(Some(room), respond),
            Link::Connecting(_) => {
                log::debug!("Connection in progress, parking switch to {room}");
                self.switches.stash(room, respond, Instant::now());
            }
            Link::Connected(_) => {
                let settled = self.switches.is_idle();
                if settled && self.current_room.as_ref() == Some(&room) {
                    let _ = respond.send(Ok(()));
                    return;
                }
                match self.switches.request(room, respond, Instant::now()) {
                    SwitchAction::Send(target) => {
                        log::info!("Requesting switch to room {target}");
                        self.dispatch(OutboundIntent::RoomSwitch(target)).await;
                    }
                    SwitchAction::Joined => log::debug!("Joined in-flight room switch"),
                    SwitchAction::Stashed => log::debug!("Room switch queued behind in-flight one"),
                }
            }
        }
    }

    fn close(&mut self, forget_room: bool) {
        let was_live = matches!(self.link, Link::Connecting(_) | Link::Connected(_));

        self.detach_link(SessionError::SessionClosed);
        self.switches.fail_all(SessionError::SessionClosed);
        self.inbound.clear();
        self.dispatcher.reset();
        self.reconnect_at = None;

        if forget_room {
            self.current_room = None;
        }
        if self.current_room.is_none() {
            self.link = Link::BaseView;
        }
        self.publish();
        log::info!("Session closed");

        if was_live {
            self.emit_disconnected(Some(NORMAL_CLOSURE), "closed by client".into(), false, None);
        }
    }

    /// Kick off an attempt now if the socket is down and a room is known.
    fn reconnect_now(&mut self) {
        if !matches!(self.link, Link::Disconnected) {
            return;
        }
        if let Some(room) = self.current_room.clone() {
            self.start_attempt(room, Vec::new());
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Link lifecycle
    // ─────────────────────────────────────────────────────────────

    fn start_attempt(&mut self, room: RoomId, waiters: Vec<Responder>) {
        let id = Uuid::new_v4();
        let tokens = self.tokens.clone();
        let events = self.link_tx.clone();
        let config = self.config.clone();
        let target = room.clone();

        let task = tokio::spawn(async move {
            let event = match open_link(tokens.as_ref(), &config, &target).await {
                Ok(stream) => LinkEvent::Opened {
                    link: id,
                    stream: Box::new(stream),
                },
                Err(error) => LinkEvent::Failed { link: id, error },
            };
            let _ = events.send(event);
        });

        log::info!(
            "Connecting to room {room} (retry {}/{})",
            self.policy.attempts(),
            self.policy.max_attempts()
        );
        self.link = Link::Connecting(Attempt {
            id,
            room,
            task,
            waiters,
        });
        self.publish();
    }

    /// Leave the current link without going through the close handler.
    fn detach_link(&mut self, error: SessionError) {
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Connecting(attempt) => {
                attempt.task.abort();
                for waiter in attempt.waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            Link::Connected(conn) => {
                log::debug!("Closing link to room {}", conn.room);
                close_detached(conn.detach(), NORMAL_CLOSURE, "");
            }
            Link::Disconnected | Link::BaseView => {}
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { link, stream } => self.on_opened(link, *stream).await,
            LinkEvent::Failed { link, error } => self.on_attempt_failed(link, error),
            LinkEvent::Frame { link, text } => {
                if self.is_current(link) {
                    self.on_frame(text).await;
                } else {
                    log::trace!("Ignoring frame from detached link {link}");
                }
            }
            LinkEvent::Closed { link, code, reason } => {
                if self.is_current(link) {
                    self.on_link_lost(code, reason);
                } else {
                    log::trace!("Ignoring close of detached link {link}");
                }
            }
        }
    }

    fn is_current(&self, link: Uuid) -> bool {
        matches!(&self.link, Link::Connected(conn) if conn.id == link)
    }

    async fn on_opened(&mut self, link: Uuid, stream: WsStream) {
        let attempt = match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Connecting(attempt) if attempt.id == link => attempt,
            other => {
                self.link = other;
                log::debug!("Discarding socket from superseded attempt {link}");
                return;
            }
        };

        let (sink, reader) = stream.split();
        let reader = tokio::spawn(read_link(link, reader, self.link_tx.clone()));
        let room = attempt.room.clone();

        self.link = Link::Connected(Connection {
            id: link,
            room: room.clone(),
            sink,
            reader,
            heartbeat: HeartbeatMonitor::new(self.config.heartbeat_interval),
        });
        self.policy.reset();
        self.dispatcher.reset();
        self.current_room = Some(room.clone());
        self.publish();

        log::info!("Connected to room {room}");
        self.emit(SessionEvent::Status(ConnectionStatus::Connected {
            room_id: room.clone(),
        }));
        for waiter in attempt.waiters {
            let _ = waiter.send(Ok(()));
        }

        if let Some(next) = self.switches.on_connected(&room, Instant::now()) {
            log::info!("Issuing parked switch to room {next}");
            self.dispatch(OutboundIntent::RoomSwitch(next)).await;
        }

        let presence = self.presence.as_ref().map(|rx| rx.borrow().clone());
        if let Some(update) = presence {
            self.dispatch(OutboundIntent::Presence {
                status: update.status,
                last_active: update.last_active,
            })
            .await;
        }
    }

    fn on_attempt_failed(&mut self, link: Uuid, error: SessionError) {
        let attempt = match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Connecting(attempt) if attempt.id == link => attempt,
            other => {
                self.link = other;
                return;
            }
        };

        log::warn!("Connection attempt to room {} failed: {error}", attempt.room);
        for waiter in attempt.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        self.switches
            .fail_all(SessionError::ConnectionLost(error.to_string()));

        if error == SessionError::NotAuthenticated {
            self.publish();
            self.emit_disconnected(None, error.to_string(), false, None);
            return;
        }
        self.schedule_reconnect(None, error.to_string());
    }

    /// Close handler for the current link.
    fn on_link_lost(&mut self, code: Option<u16>, reason: String) {
        if let Link::Connected(conn) = std::mem::replace(&mut self.link, Link::Disconnected) {
            drop(conn.detach());
        }
        self.switches
            .fail_all(SessionError::ConnectionLost(reason.clone()));

        if code == Some(NORMAL_CLOSURE) {
            log::info!("Connection closed normally");
            self.publish();
            self.emit_disconnected(code, reason, false, None);
            return;
        }

        log::warn!("Connection lost (code {code:?}): {reason}");
        self.schedule_reconnect(code, reason);
    }

    fn schedule_reconnect(&mut self, code: Option<u16>, reason: String) {
        self.publish();
        if self.current_room.is_none() {
            self.emit_disconnected(code, reason, false, None);
            return;
        }

        match self.policy.next_delay() {
            Some(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                log::warn!(
                    "Reconnecting in {delay:?} (attempt {}/{})",
                    self.policy.attempts(),
                    self.policy.max_attempts()
                );
                self.emit_disconnected(code, reason, true, Some(delay));
            }
            None => {
                log::error!(
                    "Giving up after {} reconnect attempts",
                    self.policy.attempts()
                );
                self.emit_disconnected(code, reason, false, None);
            }
        }
    }

    fn on_reconnect_timer(&mut self) {
        self.reconnect_at = None;
        match self.link {
            Link::Connecting(_) | Link::Connected(_) => {
                log::debug!("Reconnect timer fired while already linked, skipping");
            }
            Link::BaseView => {}
            Link::Disconnected => {
                if let Some(room) = self.current_room.clone() {
                    self.start_attempt(room, Vec::new());
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────

    async fn on_frame(&mut self, text: String) {
        match decode_inbound(&text) {
            Ok(Inbound::HeartbeatAck) => {
                if let Link::Connected(conn) = &mut self.link {
                    conn.heartbeat.record_ack();
                }
            }
            Ok(Inbound::Frame(InboundFrame::RoomSwitchSuccess { room_id })) => {
                self.on_switch_success(room_id).await;
            }
            Ok(Inbound::Frame(InboundFrame::RoomSwitchError { room_id, message })) => {
                if !self.switches.on_error(&room_id, &message) {
                    log::warn!("Unmatched room switch error for {room_id}: {message}");
                } else {
                    log::warn!("Room switch to {room_id} rejected: {message}");
                }
                self.issue_next_switch().await;
            }
            Ok(Inbound::Frame(InboundFrame::Unknown)) => {
                log::warn!("Dropping frame of unknown type");
            }
            Ok(Inbound::Frame(frame)) => {
                log::trace!("Queued {} frame", frame.kind());
                self.inbound.push(frame);
            }
            Err(e) => log::warn!("Dropping malformed frame: {e}"),
        }
    }

    async fn on_switch_success(&mut self, room_id: RoomId) {
        let late = self.switches.on_success(&room_id);
        if late {
            log::warn!("Late switch confirmation for room {room_id}, accepting it");
        } else {
            log::info!("Switched to room {room_id}");
        }
        self.current_room = Some(room_id.clone());
        self.publish();
        self.emit(SessionEvent::RoomChanged { room_id, late });
        self.issue_next_switch().await;
    }

    async fn expire_switches(&mut self) {
        if !self.switches.expire(Instant::now()).is_empty() {
            self.issue_next_switch().await;
        }
    }

    async fn issue_next_switch(&mut self) {
        let next = self
            .switches
            .issue_next(self.current_room.as_ref(), Instant::now());
        if let Some(room_id) = next {
            log::info!("Requesting switch to room {room_id}");
            self.dispatch(OutboundIntent::RoomSwitch(room_id)).await;
        }
    }

    fn drain_inbound(&mut self) {
        for frame in self.inbound.drain() {
            self.emit(SessionEvent::Inbound(frame));
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────

    async fn dispatch(&mut self, intent: OutboundIntent) {
        let temp_id = match &intent {
            OutboundIntent::Message { temp_id, .. } => Some(temp_id.clone()),
            _ => None,
        };

        let room = match (&self.link, &self.current_room) {
            (Link::Connected(_), Some(room)) => room.clone(),
            (Link::Connected(conn), None) => conn.room.clone(),
            _ => {
                match temp_id {
                    Some(temp_id) => {
                        log::warn!("Socket closed before message {temp_id} was written");
                        self.emit(SessionEvent::SendFailed {
                            temp_id,
                            reason: SessionError::NotConnected.to_string(),
                        });
                    }
                    None => log::debug!("Not connected, dropping {intent:?}"),
                }
                return;
            }
        };

        let Some(frame) = self.dispatcher.prepare(intent, &room, Instant::now()) else {
            return;
        };
        if !self.write_frame(frame).await {
            if let Some(temp_id) = temp_id {
                self.emit(SessionEvent::SendFailed {
                    temp_id,
                    reason: "write failed".into(),
                });
            }
        }
    }

    async fn write_frame(&mut self, frame: OutboundFrame) -> bool {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {} frame: {e}", frame.kind());
                return false;
            }
        };

        let Link::Connected(conn) = &mut self.link else {
            return false;
        };
        match conn.sink.send(Message::text(text)).await {
            Ok(()) => {
                log::debug!("Sent {} frame", frame.kind());
                true
            }
            Err(e) => {
                log::warn!("Write of {} frame failed: {e}", frame.kind());
                self.on_link_lost(Some(ABNORMAL_CLOSURE), format!("write failed: {e}"));
                false
            }
        }
    }

    async fn send_probe(&mut self) {
        let Link::Connected(conn) = &mut self.link else {
            return;
        };
        conn.heartbeat.record_probe();
        match conn.sink.send(Message::text(HEARTBEAT_PROBE)).await {
            Ok(()) => log::trace!("Heartbeat probe sent"),
            Err(e) => {
                log::warn!("Heartbeat probe failed: {e}");
                if let Link::Connected(conn) =
                    std::mem::replace(&mut self.link, Link::Disconnected)
                {
                    close_detached(conn.detach(), HEARTBEAT_FAILURE, "heartbeat failed");
                }
                self.on_link_lost(Some(HEARTBEAT_FAILURE), "heartbeat failed".into());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────

    fn publish(&self) {
        let next = SessionSnapshot {
            state: self.link.state(),
            room: self.current_room.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        self.subscribers.broadcast(&event);
    }

    fn emit_disconnected(
        &self,
        code: Option<u16>,
        reason: String,
        will_reconnect: bool,
        retry_in: Option<Duration>,
    ) {
        self.emit(SessionEvent::Status(ConnectionStatus::Disconnected {
            code,
            reason,
            will_reconnect,
            attempt: self.policy.attempts(),
            retry_in,
        }));
    }
}

// ─────────────────────────────────────────────────────────────────
// Link tasks
// ─────────────────────────────────────────────────────────────────

async fn open_link(
    tokens: &dyn TokenProvider,
    config: &SessionConfig,
    room: &RoomId,
) -> Result<WsStream, SessionError> {
    let token = tokens
        .auth_token()
        .await
        .ok_or(SessionError::NotAuthenticated)?;
    let url = config.socket_url(&token, room.as_str());

    match tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url)).await
    {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(SessionError::ConnectFailed(e.to_string())),
        Err(_) => Err(SessionError::ConnectTimeout(config.connect_timeout)),
    }
}

/// Forward text frames until the socket closes, then report how it closed.
async fn read_link(
    link: Uuid,
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let text = text.as_str().to_owned();
                if events.send(LinkEvent::Frame { link, text }).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                    None => (None, String::new()),
                };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break (Some(ABNORMAL_CLOSURE), e.to_string()),
            None => break (Some(ABNORMAL_CLOSURE), "connection reset".to_string()),
        }
    };
    let _ = events.send(LinkEvent::Closed { link, code, reason });
}

/// Send a close frame on a writer nobody listens to anymore.
fn close_detached(mut sink: WsSink, code: u16, reason: &'static str) {
    tokio::spawn(async move {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            log::trace!("Close frame not delivered: {e}");
        }
        let _ = sink.close().await;
    });
}

async fn heartbeat_due(link: &mut Link) {
    match link {
        Link::Connected(conn) => {
            conn.heartbeat.tick().await;
        }
        _ => pending::<()>().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

/// Next presence transition, or `None` once the tracker is gone.
async fn presence_changed(
    presence: &mut Option<watch::Receiver<PresenceUpdate>>,
) -> Option<PresenceUpdate> {
    match presence {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => pending().await,
    }
}
