use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ValidationError;

/// Live counters for one uploader
#[derive(Debug, Default)]
pub struct LiveMetrics {
    files_selected: AtomicU64,
    files_invalid: AtomicU64,
    files_started: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    files_stopped: AtomicU64,
    files_requeued: AtomicU64,
    files_removed: AtomicU64,
    bytes_uploaded: AtomicU64,
    stale_callbacks: AtomicU64,

    // Rejections per validation reason
    invalid_by_reason: RwLock<HashMap<ValidationError, u64>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_files_selected(&self) {
        self.files_selected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_files_invalid(&self, reason: ValidationError) {
        self.files_invalid.fetch_add(1, Ordering::Relaxed);
        *self.invalid_by_reason.write().entry(reason).or_insert(0) += 1;
    }

    pub fn increment_files_started(&self) {
        self.files_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_files_completed(&self, bytes: u64) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_files_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_files_stopped(&self) {
        self.files_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_files_requeued(&self) {
        self.files_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_files_removed(&self) {
        self.files_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_callbacks(&self) {
        self.stale_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_selected(&self) -> u64 {
        self.files_selected.load(Ordering::Relaxed)
    }

    pub fn files_invalid(&self) -> u64 {
        self.files_invalid.load(Ordering::Relaxed)
    }

    pub fn files_started(&self) -> u64 {
        self.files_started.load(Ordering::Relaxed)
    }

    pub fn files_completed(&self) -> u64 {
        self.files_completed.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn files_stopped(&self) -> u64 {
        self.files_stopped.load(Ordering::Relaxed)
    }

    pub fn files_requeued(&self) -> u64 {
        self.files_requeued.load(Ordering::Relaxed)
    }

    pub fn files_removed(&self) -> u64 {
        self.files_removed.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Relaxed)
    }

    pub fn stale_callbacks(&self) -> u64 {
        self.stale_callbacks.load(Ordering::Relaxed)
    }

    /// Rejections recorded for one reason
    pub fn invalid_for(&self, reason: ValidationError) -> u64 {
        self.invalid_by_reason.read().get(&reason).copied().unwrap_or(0)
    }

    /// Collect current snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            files_selected: self.files_selected(),
            files_invalid: self.files_invalid(),
            files_started: self.files_started(),
            files_completed: self.files_completed(),
            files_failed: self.files_failed(),
            files_stopped: self.files_stopped(),
            files_requeued: self.files_requeued(),
            files_removed: self.files_removed(),
            bytes_uploaded: self.bytes_uploaded(),
            stale_callbacks: self.stale_callbacks(),
            invalid_by_reason: self
                .invalid_by_reason
                .read()
                .iter()
                .map(|(reason, count)| (reason.code().to_string(), *count))
                .collect(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub files_selected: u64,
    pub files_invalid: u64,
    pub files_started: u64,
    pub files_completed: u64,
    pub files_failed: u64,
    pub files_stopped: u64,
    pub files_requeued: u64,
    pub files_removed: u64,
    pub bytes_uploaded: u64,
    pub stale_callbacks: u64,
    pub invalid_by_reason: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Completed share of finished transfers, as a percentage
    pub fn success_rate(&self) -> f64 {
        let finished = self.files_completed + self.files_failed;
        if finished == 0 {
            100.0
        } else {
            (self.files_completed as f64 / finished as f64) * 100.0
        }
    }

    /// Starts that have not yet finished, failed or been stopped
    pub fn in_flight(&self) -> u64 {
        self.files_started
            .saturating_sub(self.files_completed + self.files_failed + self.files_stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_metrics() {
        let metrics = LiveMetrics::new();

        metrics.increment_files_selected();
        metrics.increment_files_started();
        metrics.increment_files_completed(2048);
        metrics.increment_files_invalid(ValidationError::Duplicate);
        metrics.increment_files_invalid(ValidationError::Duplicate);

        assert_eq!(metrics.files_selected(), 1);
        assert_eq!(metrics.files_completed(), 1);
        assert_eq!(metrics.bytes_uploaded(), 2048);
        assert_eq!(metrics.invalid_for(ValidationError::Duplicate), 2);
        assert_eq!(metrics.invalid_for(ValidationError::FileListMax), 0);
    }

    #[test]
    fn test_snapshot_rates() {
        let snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            files_selected: 10,
            files_invalid: 0,
            files_started: 10,
            files_completed: 8,
            files_failed: 1,
            files_stopped: 0,
            files_requeued: 0,
            files_removed: 0,
            bytes_uploaded: 0,
            stale_callbacks: 0,
            invalid_by_reason: HashMap::new(),
        };

        assert_eq!(snapshot.success_rate(), 88.88888888888889);
        assert_eq!(snapshot.in_flight(), 1);
    }
}
