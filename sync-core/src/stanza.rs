//! Per-session stanza id counter.
//!
//! Outbound stanza ids are positive and strictly increasing within a session.
//! The counter is reset whenever a new session starts; ids are never
//! persisted and are not unique across sessions.

use outbox_sync_types::StanzaId;
use std::sync::atomic::{AtomicI32, Ordering};

/// Monotonic source of client stanza ids.
#[derive(Debug, Default)]
pub struct StanzaCounter {
    last: AtomicI32,
}

impl StanzaCounter {
    /// Create a counter whose first id is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next stanza id.
    ///
    /// Wraps back to 1 rather than going non-positive, since negative ids
    /// belong to the server.
    pub fn next_id(&self) -> StanzaId {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(if last == i32::MAX { 1 } else { last + 1 })
            })
            .unwrap_or(0);
        StanzaId::new(if previous == i32::MAX { 1 } else { previous + 1 })
    }

    /// The last id handed out (0 when none yet).
    pub fn last_id(&self) -> i32 {
        self.last.load(Ordering::Acquire)
    }

    /// Start over at 1 (called on every session start).
    pub fn reset(&self) {
        self.last.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_start_at_one_and_increase() {
        let counter = StanzaCounter::new();
        assert_eq!(counter.next_id(), StanzaId::new(1));
        assert_eq!(counter.next_id(), StanzaId::new(2));
        assert_eq!(counter.next_id(), StanzaId::new(3));
        assert_eq!(counter.last_id(), 3);
    }

    #[test]
    fn reset_restarts_sequence() {
        let counter = StanzaCounter::new();
        counter.next_id();
        counter.next_id();

        counter.reset();
        assert_eq!(counter.next_id(), StanzaId::new(1));
    }

    #[test]
    fn ids_stay_positive_at_wraparound() {
        let counter = StanzaCounter {
            last: AtomicI32::new(i32::MAX - 1),
        };
        assert_eq!(counter.next_id(), StanzaId::new(i32::MAX));
        assert_eq!(counter.next_id(), StanzaId::new(1));
    }

    #[test]
    fn concurrent_allocation_yields_distinct_ids() {
        let counter = Arc::new(StanzaCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    (0..250).map(|_| counter.next_id().value()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&1000));
    }
}
