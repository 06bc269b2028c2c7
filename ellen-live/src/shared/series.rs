//! Bounded, ordered containers for time-series and feed data.
//!
//! [`BoundedSeries`] backs the charts: ascending by time key, oldest evicted first.
//! [`RecentList`] backs the signal and log feeds: newest first, tail truncated.

use crate::shared::types::Candle;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Element of a [`BoundedSeries`], ordered by its time key.
pub trait TimeKeyed {
    fn time_key(&self) -> DateTime<Utc>;
}

impl TimeKeyed for Candle {
    fn time_key(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Outcome of [`BoundedSeries::append_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesUpdate {
    /// Newer than the tail, appended (possibly evicting the head)
    Appended,
    /// Same time key as an existing element, replaced in place
    Replaced,
    /// Late element inserted at its ordered position (evicting the head when full)
    Inserted,
    /// Older than the head of a full series
    Ignored,
}

/// Fixed-capacity series, strictly ascending by time key.
///
/// Appends and updates of the tail are O(1); evicting beyond capacity drops from the head and
/// never reorders survivors.
#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> BoundedSeries<T>
where
    T: TimeKeyed + Clone,
{
    /// Create a series that keeps at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Create a series that keeps the full history
    pub fn unbounded() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the whole contents with a snapshot.
    ///
    /// The snapshot is sorted by time key (stable), duplicate keys collapse to the last
    /// occurrence, and only the most recent `capacity` items are kept.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) {
        let mut items: Vec<T> = items.into_iter().collect();
        items.sort_by_key(|item| item.time_key());

        self.items.clear();
        for item in items {
            match self.items.back_mut() {
                Some(last) if last.time_key() == item.time_key() => *last = item,
                _ => self.items.push_back(item),
            }
        }

        if let Some(capacity) = self.capacity {
            let excess = self.items.len().saturating_sub(capacity);
            self.items.drain(..excess);
        }
    }

    /// Apply a stream delta: replace the element with the same time key in place, otherwise
    /// insert at its ordered position (usually the tail) and evict from the head beyond
    /// capacity.
    pub fn append_or_update(&mut self, item: T) -> SeriesUpdate {
        let key = item.time_key();

        let Some(last) = self.items.back_mut() else {
            self.items.push_back(item);
            return SeriesUpdate::Appended;
        };

        if key > last.time_key() {
            self.items.push_back(item);
            if self.capacity.is_some_and(|capacity| self.items.len() > capacity) {
                self.items.pop_front();
            }
            return SeriesUpdate::Appended;
        }

        if key == last.time_key() {
            *last = item;
            return SeriesUpdate::Replaced;
        }

        // Late delta for an older key
        match self.items.binary_search_by_key(&key, |existing| existing.time_key()) {
            Ok(index) => {
                self.items[index] = item;
                SeriesUpdate::Replaced
            }
            Err(0) if self.is_full() => {
                debug!(%key, "dropping delta older than the head of a full series");
                SeriesUpdate::Ignored
            }
            Err(index) => {
                let evict = self.is_full();
                self.items.insert(index, item);
                if evict {
                    self.items.pop_front();
                }
                SeriesUpdate::Inserted
            }
        }
    }

    /// Most recent `n` items, oldest first
    pub fn tail(&self, n: usize) -> Vec<&T> {
        let start = self.items.len().saturating_sub(n);
        self.items.range(start..).collect()
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Owned copy of the contents, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.items.len() >= capacity)
    }
}

/// Newest-first list capped at a fixed length, used for append-only feeds.
#[derive(Debug, Clone)]
pub struct RecentList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RecentList<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace with a snapshot that is already ordered newest first
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) {
        self.items = items.into_iter().take(self.capacity).collect();
    }

    /// Prepend a new entry, dropping the oldest beyond capacity
    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Owned copy of the contents, newest first
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
