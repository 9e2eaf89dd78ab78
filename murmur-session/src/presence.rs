//! Local presence tracking.
//!
//! ```text
//! input / focus ──► PresenceTracker ──watch──► session driver ──► presence_update
//!                        │
//!                        └── idle for `idle_timeout` ──► away
//! ```
//!
//! Only status transitions are published; activity inside the same status
//! just moves `last_active` forward for the next transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use murmur_proto::PresenceStatus;
use tokio::sync::watch;
use tokio::time::Instant;

/// Status snapshot published to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub status: PresenceStatus,
    pub last_active: DateTime<Utc>,
}

struct Activity {
    last_input: Instant,
    last_active: DateTime<Utc>,
    visible: bool,
    offline: bool,
}

struct Inner {
    tx: watch::Sender<PresenceUpdate>,
    idle_timeout: Duration,
    activity: Mutex<Activity>,
}

/// Shared presence source. Cheap to clone.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(idle_timeout: Duration) -> Self {
        let now = Utc::now();
        let (tx, _) = watch::channel(PresenceUpdate {
            status: PresenceStatus::Active,
            last_active: now,
        });
        Self {
            inner: Arc::new(Inner {
                tx,
                idle_timeout,
                activity: Mutex::new(Activity {
                    last_input: Instant::now(),
                    last_active: now,
                    visible: true,
                    offline: false,
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceUpdate> {
        self.inner.tx.subscribe()
    }

    pub fn current(&self) -> PresenceUpdate {
        self.inner.tx.borrow().clone()
    }

    /// User did something (typed, clicked, sent).
    pub fn record_activity(&self) {
        let mut activity = self.lock();
        activity.last_input = Instant::now();
        activity.last_active = Utc::now();
        activity.offline = false;
        let status = self.derive_status(&activity);
        let last_active = activity.last_active;
        drop(activity);
        self.publish(status, last_active);
    }

    /// Window/tab visibility changed.
    pub fn set_visible(&self, visible: bool) {
        let mut activity = self.lock();
        activity.visible = visible;
        if visible {
            activity.last_input = Instant::now();
            activity.last_active = Utc::now();
        }
        let status = self.derive_status(&activity);
        let last_active = activity.last_active;
        drop(activity);
        self.publish(status, last_active);
    }

    /// Explicit sign-off. Cleared by the next activity.
    pub fn go_offline(&self) {
        let mut activity = self.lock();
        activity.offline = true;
        let last_active = activity.last_active;
        drop(activity);
        self.publish(PresenceStatus::Offline, last_active);
    }

    /// Demote to away once input has been idle for the timeout.
    pub fn poll_idle(&self) -> PresenceStatus {
        let activity = self.lock();
        let status = self.derive_status(&activity);
        let last_active = activity.last_active;
        drop(activity);
        self.publish(status, last_active);
        status
    }

    /// Poll for idleness every `period` until every receiver is gone.
    pub async fn run_idle_monitor(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if self.inner.tx.is_closed() {
                break;
            }
            self.poll_idle();
        }
    }

    fn derive_status(&self, activity: &Activity) -> PresenceStatus {
        if activity.offline {
            PresenceStatus::Offline
        } else if !activity.visible || activity.last_input.elapsed() >= self.inner.idle_timeout {
            PresenceStatus::Away
        } else {
            PresenceStatus::Active
        }
    }

    fn publish(&self, status: PresenceStatus, last_active: DateTime<Utc>) {
        self.inner.tx.send_if_modified(|current| {
            if current.status == status {
                return false;
            }
            log::debug!("Presence {} -> {}", current.status.as_str(), status.as_str());
            *current = PresenceUpdate {
                status,
                last_active,
            };
            true
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.inner.activity.lock().unwrap_or_else(|e| e.into_inner())
    }
}
