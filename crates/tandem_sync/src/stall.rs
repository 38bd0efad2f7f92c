//! Stall handling
//!
//! A tick stalls while some expected sender has not delivered input for it.
//! After the stall timeout the configured [`StallPolicy`] decides what the
//! driver does next.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tandem_core::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    /// Keep waiting; each timeout surfaces a `Stalled` outcome.
    #[default]
    Wait,
    /// Substitute the missing sender's last known frame.
    RepeatLastInput,
    /// Stop expecting input from the missing senders.
    DropPeer,
}

/// Tracks how long the driver has been waiting on one tick.
#[derive(Debug, Clone)]
pub struct StallTracker {
    timeout: Duration,
    waiting: Option<(Tick, Instant)>,
}

impl StallTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            waiting: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for `tick`. The clock starts the first time a tick is
    /// observed and restarts when the tick changes.
    pub fn deadline(&mut self, tick: Tick, now: Instant) -> Instant {
        match self.waiting {
            Some((t, since)) if t == tick => since + self.timeout,
            _ => {
                self.waiting = Some((tick, now));
                now + self.timeout
            }
        }
    }

    pub fn is_expired(&mut self, tick: Tick, now: Instant) -> bool {
        now >= self.deadline(tick, now)
    }

    /// Restarts the clock for the current tick.
    pub fn rearm(&mut self, now: Instant) {
        if let Some((_, since)) = self.waiting.as_mut() {
            *since = now;
        }
    }

    pub fn clear(&mut self) {
        self.waiting = None;
    }
}
