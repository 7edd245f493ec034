//! Per-connection message rate limiting
//!
//! Two independent drivers act on the same records:
//! - a per-connection window tick that rolls the observation window over, and
//! - a global sweep that lifts expired penalties even for connections that
//!   never send again.
//!
//! The message path only counts and flips the limited flag.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::util::time::Clock;
use crate::ws::identity::ConnectionId;

/// Rate limit bookkeeping for one open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub request_count: u32,
    pub limited: bool,
    /// Wall-clock ms when the limit was applied
    pub limited_at: Option<i64>,
    /// Time accumulated in the current observation window (ms)
    pub window_elapsed: i64,
}

impl RateLimitRecord {
    fn new() -> Self {
        Self {
            request_count: 0,
            limited: false,
            limited_at: None,
            window_elapsed: 0,
        }
    }

    fn reset_window(&mut self) {
        self.request_count = 0;
        self.window_elapsed = 0;
    }
}

/// Verdict for one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch the message
    Allowed,
    /// This message tripped the limit; notify the client and drop it
    Tripped,
    /// Already limited; drop silently
    Suppressed,
    /// No record for this connection (already closed)
    Unknown,
}

/// Sliding-window limiter over every open connection
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    records: DashMap<ConnectionId, RateLimitRecord>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: DashMap::new(),
        }
    }

    pub fn register(&self, id: &ConnectionId) {
        self.records.insert(id.clone(), RateLimitRecord::new());
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<RateLimitRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    pub fn record(&self, id: &ConnectionId) -> Option<RateLimitRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Count a message and decide whether it may be dispatched.
    ///
    /// The message that brings the window's count up to `max_requests` trips
    /// the limit and is not dispatched.
    pub fn check(&self, id: &ConnectionId) -> Admission {
        let Some(mut record) = self.records.get_mut(id) else {
            return Admission::Unknown;
        };
        if record.limited {
            return Admission::Suppressed;
        }

        record.request_count += 1;
        if record.request_count >= self.config.max_requests {
            record.limited = true;
            record.limited_at = Some(self.clock.now_millis());
            debug!(connection_id = %id, "Client is rate limited");
            return Admission::Tripped;
        }

        Admission::Allowed
    }

    /// Per-connection window tick, called every `tick_ms`
    pub fn window_tick(&self, id: &ConnectionId) {
        let Some(mut record) = self.records.get_mut(id) else {
            return;
        };
        if record.limited {
            // Inert while limited; only the sweep lifts the penalty
            record.reset_window();
            return;
        }
        record.window_elapsed += self.config.tick_ms as i64;
        if record.window_elapsed > self.config.max_window_ms {
            record.reset_window();
        }
    }

    /// Lift every penalty older than `penalty_ms`; returns how many were lifted
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut lifted = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            let Some(limited_at) = record.limited_at else {
                continue;
            };
            if record.limited && now - limited_at > self.config.penalty_ms {
                record.limited = false;
                record.limited_at = None;
                record.reset_window();
                lifted += 1;
                debug!(connection_id = %entry.key(), "Client is no longer rate limited");
            }
        }
        lifted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn limited_count(&self) -> usize {
        self.records.iter().filter(|r| r.value().limited).count()
    }

    /// Drive one connection's window tick until the record disappears
    pub async fn run_window_ticks(self: Arc<Self>, id: ConnectionId) {
        let period = Duration::from_millis(self.config.tick_ms);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !self.records.contains_key(&id) {
                break;
            }
            self.window_tick(&id);
        }
    }

    /// Drive the global sweep forever
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.sweep_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.sweep();
        }
    }
}
