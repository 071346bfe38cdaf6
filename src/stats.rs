//! Operational counters for the engine.
//!
//! Every non-fatal error condition in the pipeline (malformed frames,
//! classifier timeouts, transport drops, exhausted dispatches) is counted
//! here so it stays observable without ever being surfaced to the stream
//! producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current engine run.
#[derive(Debug)]
pub struct EngineStats {
    /// Readings successfully parsed and ingested
    readings_ingested: AtomicU64,
    /// Malformed frames dropped at the source boundary
    parse_errors: AtomicU64,
    /// Classifier calls that exceeded the timeout
    classification_timeouts: AtomicU64,
    /// Classifier calls that returned a model error
    classification_errors: AtomicU64,
    /// Transport disconnects observed
    transport_disconnects: AtomicU64,
    /// Windows rolled forward
    windows_rolled: AtomicU64,
    /// Trigger events emitted by the evaluator
    triggers_emitted: AtomicU64,
    /// Trigger events acknowledged by the assistant service
    triggers_delivered: AtomicU64,
    /// Individual delivery attempts that failed
    dispatch_failures: AtomicU64,
    /// Trigger events dropped after exhausting retries or superseded unsent
    triggers_dropped: AtomicU64,
    /// Engine start time
    started_at: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            readings_ingested: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            classification_timeouts: AtomicU64::new(0),
            classification_errors: AtomicU64::new(0),
            transport_disconnects: AtomicU64::new(0),
            windows_rolled: AtomicU64::new(0),
            triggers_emitted: AtomicU64::new(0),
            triggers_delivered: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            triggers_dropped: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats object that persists counters to `path` on save.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);
        if let Err(e) = stats.load() {
            tracing::debug!(error = %e, "no previous stats loaded");
        }
        stats
    }

    pub fn record_reading(&self) {
        self.readings_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classification_timeout(&self) {
        self.classification_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classification_error(&self) {
        self.classification_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.transport_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_rolled(&self) {
        self.windows_rolled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger_emitted(&self) {
        self.triggers_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger_delivered(&self) {
        self.triggers_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger_dropped(&self) {
        self.triggers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a value copy of the current counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            readings_ingested: self.readings_ingested.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            classification_timeouts: self.classification_timeouts.load(Ordering::Relaxed),
            classification_errors: self.classification_errors.load(Ordering::Relaxed),
            transport_disconnects: self.transport_disconnects.load(Ordering::Relaxed),
            windows_rolled: self.windows_rolled.load(Ordering::Relaxed),
            triggers_emitted: self.triggers_emitted.load(Ordering::Relaxed),
            triggers_delivered: self.triggers_delivered.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            triggers_dropped: self.triggers_dropped.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Engine Statistics:\n\
             - Readings ingested: {}\n\
             - Parse errors (dropped): {}\n\
             - Classification timeouts: {}\n\
             - Classification errors: {}\n\
             - Transport disconnects: {}\n\
             - Windows rolled: {}\n\
             - Triggers emitted: {}\n\
             - Triggers delivered: {}\n\
             - Dispatch failures: {}\n\
             - Triggers dropped: {}\n\
             - Uptime: {} seconds",
            s.readings_ingested,
            s.parse_errors,
            s.classification_timeouts,
            s.classification_errors,
            s.transport_disconnects,
            s.windows_rolled,
            s.triggers_emitted,
            s.triggers_delivered,
            s.dispatch_failures,
            s.triggers_dropped,
            s.uptime_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&self.snapshot())
                .map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load counters from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: EngineStatsSnapshot =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.readings_ingested
                    .store(persisted.readings_ingested, Ordering::Relaxed);
                self.parse_errors
                    .store(persisted.parse_errors, Ordering::Relaxed);
                self.classification_timeouts
                    .store(persisted.classification_timeouts, Ordering::Relaxed);
                self.classification_errors
                    .store(persisted.classification_errors, Ordering::Relaxed);
                self.transport_disconnects
                    .store(persisted.transport_disconnects, Ordering::Relaxed);
                self.windows_rolled
                    .store(persisted.windows_rolled, Ordering::Relaxed);
                self.triggers_emitted
                    .store(persisted.triggers_emitted, Ordering::Relaxed);
                self.triggers_delivered
                    .store(persisted.triggers_delivered, Ordering::Relaxed);
                self.dispatch_failures
                    .store(persisted.dispatch_failures, Ordering::Relaxed);
                self.triggers_dropped
                    .store(persisted.triggers_dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Value copy of the engine counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    pub readings_ingested: u64,
    pub parse_errors: u64,
    pub classification_timeouts: u64,
    pub classification_errors: u64,
    pub transport_disconnects: u64,
    pub windows_rolled: u64,
    pub triggers_emitted: u64,
    pub triggers_delivered: u64,
    pub dispatch_failures: u64,
    pub triggers_dropped: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub uptime_secs: u64,
}

/// Thread-safe shared stats handle.
pub type SharedEngineStats = Arc<EngineStats>;

/// Create a new shared stats handle.
pub fn create_shared_stats() -> SharedEngineStats {
    Arc::new(EngineStats::new())
}

/// Create a new shared stats handle with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedEngineStats {
    Arc::new(EngineStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = EngineStats::new();

        stats.record_reading();
        stats.record_reading();
        stats.record_parse_error();
        stats.record_trigger_emitted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.readings_ingested, 2);
        assert_eq!(snapshot.parse_errors, 1);
        assert_eq!(snapshot.triggers_emitted, 1);
        assert_eq!(snapshot.triggers_dropped, 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = EngineStats::new();
        stats.record_classification_timeout();

        let summary = stats.summary();
        assert!(summary.contains("Readings ingested"));
        assert!(summary.contains("Classification timeouts: 1"));
        assert!(summary.contains("Triggers"));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::env::temp_dir().join("seatsense-stats-test.json");
        let _ = std::fs::remove_file(&path);

        let stats = EngineStats::with_persistence(path.clone());
        stats.record_reading();
        stats.record_disconnect();
        stats.save().unwrap();

        let reloaded = EngineStats::with_persistence(path.clone());
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.readings_ingested, 1);
        assert_eq!(snapshot.transport_disconnects, 1);

        let _ = std::fs::remove_file(&path);
    }
}
