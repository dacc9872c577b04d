//! Aggregate outcome of a synchronous sync pass.

use std::fmt;

/// Counts of confirmed and failed entries in one `sync_now` pass.
///
/// Per-entry failures never abort a pass; they are tallied here instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries positively acknowledged and removed from the queue.
    pub success: usize,
    /// Entries that failed to send, timed out or were rejected.
    pub failure: usize,
}

impl SyncReport {
    /// Record a confirmed entry.
    pub fn record_success(&mut self) {
        self.success += 1;
    }

    /// Record a failed entry.
    pub fn record_failure(&mut self) {
        self.failure += 1;
    }

    /// Total entries attempted.
    pub fn attempted(&self) -> usize {
        self.success + self.failure
    }

    /// True if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failure == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} confirmed, {} failed", self.success, self.failure)
    }
}

/// Counts of the background drain triggered by a reconnect.
///
/// Drained entries are not awaited; `sent` only means the transport took them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries handed to the transport.
    pub sent: usize,
    /// Entries whose send failed (retry count bumped).
    pub failed: usize,
    /// Retryable entries belonging to other conversations.
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tallies() {
        let mut report = SyncReport::default();
        report.record_success();
        report.record_success();
        report.record_failure();

        assert_eq!(report, SyncReport { success: 2, failure: 1 });
        assert_eq!(report.attempted(), 3);
        assert!(!report.is_clean());
        assert_eq!(report.to_string(), "2 confirmed, 1 failed");
    }

    #[test]
    fn empty_report_is_clean() {
        assert!(SyncReport::default().is_clean());
        assert_eq!(DrainReport::default().sent, 0);
    }
}
