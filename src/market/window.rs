use crate::market::records::{CanonicalEvent, EventIdentity};
use crate::market::types::Snapshot;
use chrono::FixedOffset;
use std::collections::BTreeMap;

/// Retention limits for a [`WindowStore`]. Both are optional; when both are set the
/// count limit is applied before the time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBound {
    pub max_rows: Option<usize>,
    pub max_age_ms: Option<i64>,
}

/// Identity-keyed event store. Iteration is always ascending by identity.
#[derive(Debug, Clone, Default)]
pub struct WindowStore {
    entries: BTreeMap<EventIdentity, CanonicalEvent>,
    bound: WindowBound,
}

impl WindowStore {
    pub fn new(bound: WindowBound) -> Self {
        Self {
            entries: BTreeMap::new(),
            bound,
        }
    }

    /// Inserts or replaces by identity, returning the replaced event.
    pub fn upsert(&mut self, event: CanonicalEvent) -> Option<CanonicalEvent> {
        self.entries.insert(event.identity(), event)
    }

    pub fn upsert_all<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = CanonicalEvent>,
    {
        for event in events {
            self.upsert(event);
        }
    }

    /// Applies the retention limits. Call once per upsert batch. Returns how many
    /// entries were evicted.
    pub fn enforce_bound(&mut self) -> usize {
        let before = self.entries.len();

        if let Some(max_rows) = self.bound.max_rows {
            while self.entries.len() > max_rows {
                if self.entries.pop_first().is_none() {
                    break;
                }
            }
        }

        if let Some(max_age_ms) = self.bound.max_age_ms {
            if let Some(latest) = self.latest_event_time_ms() {
                let cutoff = latest.saturating_sub(max_age_ms);
                self.entries
                    .retain(|_, event| event.event_time_ms() >= cutoff);
            }
        }

        before - self.entries.len()
    }

    pub fn latest_event_time_ms(&self) -> Option<i64> {
        self.entries.values().map(CanonicalEvent::event_time_ms).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materializes the current rows; never mutates the store.
    pub fn snapshot(&self, header: &'static [&'static str], offset: FixedOffset) -> Snapshot {
        let rows = self
            .entries
            .values()
            .map(|event| event.row(offset))
            .collect();
        Snapshot::new(header, rows)
    }
}
