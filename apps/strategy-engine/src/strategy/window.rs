//! Bounded, time-sorted windows over market data series.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::marketdata::{Candle, Tick};

/// Anything carrying a market data timestamp.
pub trait Timestamped {
    /// The item's timestamp.
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for Candle {
    fn timestamp(&self) -> DateTime<Utc> {
        self.datetime
    }
}

impl Timestamped for Tick {
    fn timestamp(&self) -> DateTime<Utc> {
        self.datetime
    }
}

/// A window over the most recent `capacity` items of a series, kept sorted
/// ascending by timestamp.
#[derive(Debug, Clone)]
pub struct SeriesWindow<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T: Timestamped> SeriesWindow<T> {
    /// Create an empty window bounded to `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Maximum number of retained items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when the window holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true once the window holds `capacity` items.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Most recent item.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Retained items, oldest first.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Append a live item.
    ///
    /// An item older than the current tail triggers a stable re-sort so the
    /// window stays ascending; the oldest items are evicted once the window
    /// exceeds its capacity.
    pub fn push(&mut self, item: T) {
        let out_of_order = self
            .items
            .last()
            .is_some_and(|tail| item.timestamp() < tail.timestamp());

        self.items.push(item);
        if out_of_order {
            self.items.sort_by_key(Timestamped::timestamp);
        }
        if self.items.len() > self.capacity {
            let excess = self.items.len() - self.capacity;
            self.items.drain(..excess);
        }
    }

    /// Merge a batch of historical items into the window.
    ///
    /// Items failing `is_valid` are dropped, duplicate timestamps keep the
    /// first occurrence (retained items win over incoming ones), the result
    /// is stably sorted ascending and truncated to the most recent
    /// `capacity` items. An empty batch is a no-op.
    pub fn merge_history(&mut self, incoming: Vec<T>, is_valid: impl Fn(&T) -> bool) {
        if incoming.is_empty() {
            return;
        }

        let mut seen: HashSet<DateTime<Utc>> = HashSet::new();
        let mut merged: Vec<T> = Vec::with_capacity(self.items.len() + incoming.len());
        for item in self.items.drain(..).chain(incoming) {
            if !is_valid(&item) {
                continue;
            }
            if !seen.insert(item.timestamp()) {
                continue;
            }
            merged.push(item);
        }

        merged.sort_by_key(Timestamped::timestamp);
        if merged.len() > self.capacity {
            let excess = merged.len() - self.capacity;
            merged.drain(..excess);
        }
        self.items = merged;
    }
}
