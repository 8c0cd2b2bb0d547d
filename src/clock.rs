//! Millisecond clocks.
//!
//! The engine only ever sees integer milliseconds. Production uses wall
//! time; the service uses a clock anchored to a tokio `Instant` so tests
//! with paused time control it.

use chrono::Utc;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time in Unix milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Unix milliseconds advanced by the tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    epoch_ms: i64,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }

    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            origin: Instant::now(),
            epoch_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}
