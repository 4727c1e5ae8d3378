//! Minimum-spacing gate for one downstream sink.
//!
//! Unlike a token bucket there is no burst and no queue: a send arriving
//! inside the window is dropped and the window is left untouched.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl RateLimitWindow {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Earliest instant at which the next send is admitted.
    pub fn next_allowed(&self) -> Option<Instant> {
        self.last_sent.map(|t| t + self.min_interval)
    }

    /// Admit a send at `now`, recording it; or refuse without side effects.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(next) = self.next_allowed() {
            if now < next {
                return false;
            }
        }
        self.last_sent = Some(now);
        true
    }
}
