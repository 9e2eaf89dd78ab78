//! Fan-out of session events to registered handlers.
//!
//! Handlers are plain callbacks held in registration order. Each delivery is
//! isolated: a handler that returns an error or panics is logged and skipped,
//! and the remaining handlers still see the event.
//!
//! ```text
//!                    ┌─► handler #1 ── Ok
//! SessionEvent ──────┼─► handler #2 ── Err / panic ── logged, counted
//!                    └─► handler #3 ── Ok
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::event::SessionEvent;

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&SessionEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Token returned by registration, used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub events_broadcast: u64,
    pub deliveries: u64,
    pub failures: u64,
    pub active_subscribers: usize,
}

#[derive(Default)]
struct AtomicSubscriberStats {
    events_broadcast: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

/// Ordered list of event handlers.
#[derive(Default)]
pub struct SubscriberRegistry {
    handlers: RwLock<Vec<(SubscriberId, Handler)>>,
    next_id: AtomicU64,
    stats: AtomicSubscriberStats,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&SessionEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every handler, returning how many accepted it.
    ///
    /// The handler list is snapshotted first so a handler may add or remove
    /// subscribers without deadlocking.
    pub fn broadcast(&self, event: &SessionEvent) -> usize {
        let snapshot: Vec<(SubscriberId, Handler)> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        self.stats.events_broadcast.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    log::error!("Subscriber {id:?} failed: {e}");
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    log::error!("Subscriber {id:?} panicked");
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        delivered
    }

    pub fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            events_broadcast: self.stats.events_broadcast.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            active_subscribers: self.len(),
        }
    }
}
