//! Room membership and fan-out.
//!
//! Each room owns one tokio broadcast channel; every connection in the room
//! holds a receiver. Frames are encoded once and shared as `Arc<Envelope>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use murmur_proto::{PresenceEntry, PresenceStatus};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// A pre-encoded frame on its way to a room.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Connection that should not receive its own frame, if any
    pub skip: Option<Uuid>,
    pub text: String,
}

impl Envelope {
    pub fn to_all(text: String) -> Self {
        Self { skip: None, text }
    }

    pub fn to_others(origin: Uuid, text: String) -> Self {
        Self {
            skip: Some(origin),
            text,
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    username: String,
    status: PresenceStatus,
    last_active: String,
}

struct Room {
    sender: broadcast::Sender<Arc<Envelope>>,
    members: HashMap<Uuid, Member>,
}

/// All live rooms, created on first join and dropped when empty.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Add a connection to `room` and return its receiver.
    pub async fn join(
        &self,
        room: &str,
        conn_id: Uuid,
        username: &str,
        now: String,
    ) -> broadcast::Receiver<Arc<Envelope>> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.to_string()).or_insert_with(|| Room {
            sender: broadcast::channel(self.capacity).0,
            members: HashMap::new(),
        });
        entry.members.insert(
            conn_id,
            Member {
                username: username.to_string(),
                status: PresenceStatus::Active,
                last_active: now,
            },
        );
        entry.sender.subscribe()
    }

    /// Remove a connection. Returns its username if it was a member.
    pub async fn leave(&self, room: &str, conn_id: Uuid) -> Option<String> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room)?;
        let member = entry.members.remove(&conn_id);
        if entry.members.is_empty() {
            rooms.remove(room);
            log::debug!("Room {room} is empty, dropping it");
        }
        member.map(|m| m.username)
    }

    /// Send to every receiver in `room`. Returns how many were reached.
    pub async fn broadcast(&self, room: &str, envelope: Envelope) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room) {
            Some(entry) => entry.sender.send(Arc::new(envelope)).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn set_presence(
        &self,
        room: &str,
        conn_id: Uuid,
        status: PresenceStatus,
        last_active: String,
    ) {
        let mut rooms = self.rooms.write().await;
        if let Some(member) = rooms
            .get_mut(room)
            .and_then(|entry| entry.members.get_mut(&conn_id))
        {
            member.status = status;
            member.last_active = last_active;
        }
    }

    /// Presence map for `room`, keyed by username.
    pub async fn presence_snapshot(&self, room: &str) -> BTreeMap<String, PresenceEntry> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|entry| {
                entry
                    .members
                    .values()
                    .map(|m| {
                        (
                            m.username.clone(),
                            PresenceEntry {
                                status: m.status,
                                last_active: m.last_active.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or(0, |entry| entry.members.len())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
