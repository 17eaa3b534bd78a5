//! Rate limiting for frame-driven analyzers.

use chrono::{DateTime, Duration, Utc};

/// Admits at most `max_rate_hz` frames per second.
///
/// Frames arriving before the minimum interval has elapsed are dropped,
/// never queued.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval: Duration,
    last_admitted: Option<DateTime<Utc>>,
    dropped: u64,
}

impl FrameThrottle {
    pub fn new(max_rate_hz: f64) -> Self {
        let micros = if max_rate_hz > 0.0 {
            (1_000_000.0 / max_rate_hz) as i64
        } else {
            0
        };
        Self {
            min_interval: Duration::microseconds(micros),
            last_admitted: None,
            dropped: 0,
        }
    }

    /// Decide whether a frame captured at `timestamp` is processed.
    pub fn admit(&mut self, timestamp: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_admitted {
            if timestamp - last < self.min_interval {
                self.dropped += 1;
                return false;
            }
        }
        self.last_admitted = Some(timestamp);
        true
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
        self.dropped = 0;
    }
}
