//! Auditable session statistics.
//!
//! Counts what the engine processed and discarded so a user can see how
//! a score came about. Only counters are kept, never the signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Transparency statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Sensor frames fully processed
    frames_processed: AtomicU64,
    /// Frames dropped by the rate throttle
    frames_throttled: AtomicU64,
    /// Frames rejected for pose or malformed input
    frames_rejected: AtomicU64,
    subtests_completed: AtomicU64,
    subtests_aborted: AtomicU64,
    records_emitted: AtomicU64,
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            frames_throttled: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            subtests_completed: AtomicU64::new(0),
            subtests_aborted: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_frames_processed(&self, count: u64) {
        self.frames_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_frames_throttled(&self, count: u64) {
        self.frames_throttled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_frames_rejected(&self, count: u64) {
        self.frames_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_subtest_completed(&self) {
        self.subtests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subtest_aborted(&self) {
        self.subtests_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_throttled: self.frames_throttled.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            subtests_completed: self.subtests_completed.load(Ordering::Relaxed),
            subtests_aborted: self.subtests_aborted.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Frames processed: {}\n\
             - Frames dropped by throttle: {}\n\
             - Frames rejected (pose/invalid): {}\n\
             - Sub-tests completed: {}\n\
             - Sub-tests aborted: {}\n\
             - Records emitted: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Data Handling:\n\
             - Raw frames are discarded after each sub-test\n\
             - Aborted sub-tests never produce a score\n\
             - Only scores and summary metrics are stored",
            stats.frames_processed,
            stats.frames_throttled,
            stats.frames_rejected,
            stats.subtests_completed,
            stats.subtests_aborted,
            stats.records_emitted,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_processed: stats.frames_processed,
                frames_throttled: stats.frames_throttled,
                frames_rejected: stats.frames_rejected,
                subtests_completed: stats.subtests_completed,
                subtests_aborted: stats.subtests_aborted,
                records_emitted: stats.records_emitted,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_processed
                    .store(persisted.frames_processed, Ordering::Relaxed);
                self.frames_throttled
                    .store(persisted.frames_throttled, Ordering::Relaxed);
                self.frames_rejected
                    .store(persisted.frames_rejected, Ordering::Relaxed);
                self.subtests_completed
                    .store(persisted.subtests_completed, Ordering::Relaxed);
                self.subtests_aborted
                    .store(persisted.subtests_aborted, Ordering::Relaxed);
                self.records_emitted
                    .store(persisted.records_emitted, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames_processed,
            &self.frames_throttled,
            &self.frames_rejected,
            &self.subtests_completed,
            &self.subtests_aborted,
            &self.records_emitted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub frames_processed: u64,
    pub frames_throttled: u64,
    pub frames_rejected: u64,
    pub subtests_completed: u64,
    pub subtests_aborted: u64,
    pub records_emitted: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_processed: u64,
    frames_throttled: u64,
    frames_rejected: u64,
    subtests_completed: u64,
    subtests_aborted: u64,
    records_emitted: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let log = TransparencyLog::new();

        log.record_frames_processed(30);
        log.record_frames_throttled(12);
        log.record_frames_rejected(3);
        log.record_subtest_completed();
        log.record_subtest_aborted();
        log.record_emitted();

        let stats = log.stats();
        assert_eq!(stats.frames_processed, 30);
        assert_eq!(stats.frames_throttled, 12);
        assert_eq!(stats.frames_rejected, 3);
        assert_eq!(stats.subtests_completed, 1);
        assert_eq!(stats.subtests_aborted, 1);
        assert_eq!(stats.records_emitted, 1);
    }

    #[test]
    fn test_reset() {
        let log = TransparencyLog::new();
        log.record_frames_processed(100);
        log.record_emitted();
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.records_emitted, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("neuro-screen-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");
        let log = TransparencyLog::with_persistence(path.clone());
        log.record_frames_processed(7);
        log.record_subtest_completed();
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path.clone());
        assert_eq!(reloaded.stats().frames_processed, 7);
        assert_eq!(reloaded.stats().subtests_completed, 1);

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_summary_format() {
        let summary = TransparencyLog::new().summary();
        assert!(summary.contains("Frames processed"));
        assert!(summary.contains("Sub-tests aborted"));
        assert!(summary.contains("never produce a score"));
    }
}
