//! Process-wide execution counters.

use isoflow_core::ErrorCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub scheduled: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Flows whose readiness check declined to start.
    pub rejected: u64,
    pub timeouts: u64,
    pub panics: u64,
    pub unload_failures: u64,
}

impl RuntimeStats {
    pub fn in_flight(&self) -> u64 {
        self.scheduled.saturating_sub(self.completed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    scheduled: AtomicU64,
    completed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
    unload_failures: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, code: ErrorCode) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if code == ErrorCode::Timeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unload_failure(&self) {
        self.unload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            unload_failures: self.unload_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = StatsRecorder::default();
        stats.record_scheduled();
        stats.record_scheduled();
        stats.record_failure(ErrorCode::Timeout);
        stats.record_failure(ErrorCode::Load);
        stats.record_completed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.in_flight(), 1);
    }
}
