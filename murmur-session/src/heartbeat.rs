//! Liveness probing for an open link.
//!
//! A `HeartbeatMonitor` only exists inside a connected link, so it is
//! dropped together with the socket and can never tick against a closed one.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub struct HeartbeatMonitor {
    ticker: Interval,
    probes_sent: u64,
    last_ack: Option<Instant>,
}

impl HeartbeatMonitor {
    /// First probe fires one full `period` after creation.
    pub fn new(period: Duration) -> Self {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            probes_sent: 0,
            last_ack: None,
        }
    }

    /// Wait for the next probe slot.
    pub async fn tick(&mut self) -> Instant {
        self.ticker.tick().await
    }

    pub fn record_probe(&mut self) {
        self.probes_sent += 1;
    }

    pub fn record_ack(&mut self) {
        self.last_ack = Some(Instant::now());
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }
}
