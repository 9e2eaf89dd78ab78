//! Room-switch request/response coordination.
//!
//! A switch is a `room_switch{room_id}` frame answered asynchronously by
//! `room_switch_success` or `room_switch_error` on the same socket. Only one
//! switch drives the wire at a time; later requests collapse into a single
//! "next" slot that is issued from the resolution path of the in-flight one.
//!
//! ```text
//!             request(A)                     success(A) / error(A) / timeout
//!   Idle ───────────────► Requested(A) ──────────────────────────────────────► Idle
//!                            │  request(B)                                   │
//!                            ▼                                               │
//!                       next = B   ──── (issued on resolution) ──────────────┘
//! ```
//!
//! The coordinator is pure state; the session driver writes whatever frame
//! it asks for and owns the clock.

use std::collections::HashMap;
use std::time::Duration;

use murmur_proto::RoomId;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SessionError;

/// Completion channel handed in by a caller awaiting an operation.
pub type Responder = oneshot::Sender<Result<(), SessionError>>;

struct PendingSwitch {
    created_at: Instant,
    /// Unset while the request only sits in the "next" slot
    deadline: Option<Instant>,
    waiters: Vec<Responder>,
}

impl PendingSwitch {
    fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            deadline: None,
            waiters: Vec::new(),
        }
    }

    fn resolve(self, result: Result<(), SessionError>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// What the driver should do after [`RoomSwitchCoordinator::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchAction {
    /// Write `room_switch{room_id}` now.
    Send(RoomId),
    /// Attached to the switch already in flight.
    Joined,
    /// Parked as the next target.
    Stashed,
}

pub struct RoomSwitchCoordinator {
    timeout: Duration,
    in_flight: Option<RoomId>,
    pending: HashMap<RoomId, PendingSwitch>,
    next: Option<RoomId>,
}

impl RoomSwitchCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: None,
            pending: HashMap::new(),
            next: None,
        }
    }

    pub fn in_flight(&self) -> Option<&RoomId> {
        self.in_flight.as_ref()
    }

    pub fn next_target(&self) -> Option<&RoomId> {
        self.next.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.next.is_none()
    }

    /// Ask to move to `room` over an open socket.
    pub fn request(&mut self, room: RoomId, waiter: Responder, now: Instant) -> SwitchAction {
        match self.in_flight.clone() {
            Some(current) if current == room => {
                self.drop_stash(&room);
                self.attach(room, waiter, now);
                SwitchAction::Joined
            }
            Some(_) => {
                self.stash(room, waiter, now);
                SwitchAction::Stashed
            }
            None => {
                self.drop_stash(&room);
                self.attach(room.clone(), waiter, now);
                self.arm(room.clone(), now);
                SwitchAction::Send(room)
            }
        }
    }

    /// Park `room` as the next target, superseding any older stash.
    pub fn stash(&mut self, room: RoomId, waiter: Responder, now: Instant) {
        self.drop_stash(&room);
        self.attach(room.clone(), waiter, now);
        self.next = Some(room);
    }

    /// Server confirmed `room`. Returns `true` if nobody was waiting for it.
    pub fn on_success(&mut self, room: &RoomId) -> bool {
        self.finish(room, Ok(())).is_none()
    }

    /// Server refused `room`. Returns `false` if nobody was waiting for it.
    pub fn on_error(&mut self, room: &RoomId, message: &str) -> bool {
        let result = Err(SessionError::SwitchRejected {
            room: room.clone(),
            message: message.to_string(),
        });
        self.finish(room, result).is_some()
    }

    /// Reject every switch whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<RoomId> {
        let expired: Vec<RoomId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
            .map(|(room, _)| room.clone())
            .collect();

        for room in &expired {
            log::warn!("Room switch to {room} timed out");
            self.finish(room, Err(SessionError::SwitchTimeout(room.clone())));
        }
        expired
    }

    /// Issue the stashed target if nothing is in flight.
    ///
    /// A stash equal to `current` is already satisfied and resolves without
    /// a frame.
    pub fn issue_next(&mut self, current: Option<&RoomId>, now: Instant) -> Option<RoomId> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.next.take()?;
        if current == Some(&next) {
            if let Some(entry) = self.pending.remove(&next) {
                entry.resolve(Ok(()));
            }
            return None;
        }
        self.arm(next.clone(), now);
        Some(next)
    }

    /// A fresh link to `room` opened. Returns a switch to issue, if any.
    pub fn on_connected(&mut self, room: &RoomId, now: Instant) -> Option<RoomId> {
        self.issue_next(Some(room), now)
    }

    /// Reject everything, in flight and stashed.
    pub fn fail_all(&mut self, error: SessionError) {
        self.in_flight = None;
        self.next = None;
        for (_, entry) in self.pending.drain() {
            entry.resolve(Err(error.clone()));
        }
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn attach(&mut self, room: RoomId, waiter: Responder, now: Instant) {
        self.pending
            .entry(room)
            .or_insert_with(|| PendingSwitch::new(now))
            .waiters
            .push(waiter);
    }

    fn arm(&mut self, room: RoomId, now: Instant) {
        if let Some(entry) = self.pending.get_mut(&room) {
            entry.deadline = Some(now + self.timeout);
        }
        self.in_flight = Some(room);
    }

    fn drop_stash(&mut self, by: &RoomId) {
        let Some(stale) = self.next.take() else {
            return;
        };
        if &stale == by {
            // Re-requested target keeps its waiters.
            return;
        }
        if let Some(entry) = self.pending.remove(&stale) {
            log::debug!("Room switch to {stale} superseded by {by}");
            entry.resolve(Err(SessionError::SwitchSuperseded {
                room: stale,
                by: by.clone(),
            }));
        }
    }

    /// Remove `room`'s entry exactly once and resolve its waiters.
    fn finish(&mut self, room: &RoomId, result: Result<(), SessionError>) -> Option<Duration> {
        if self.in_flight.as_ref() == Some(room) {
            self.in_flight = None;
        }
        if self.next.as_ref() == Some(room) {
            self.next = None;
        }
        let entry = self.pending.remove(room)?;
        let elapsed = entry.created_at.elapsed();
        log::debug!("Room switch to {room} settled after {elapsed:?}");
        entry.resolve(result);
        Some(elapsed)
    }
}
