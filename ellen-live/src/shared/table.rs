//! Identity-keyed collection for point-updatable rows (open trades, live prices, positions).

use crate::shared::types::{EntityId, Position, PricePoint, Symbol, TradePoint};
use indexmap::IndexMap;
use std::hash::Hash;

/// Row of an [`EntityTable`], identified by a stable key.
pub trait Keyed {
    type Key: Hash + Eq + Clone;

    fn key(&self) -> Self::Key;
}

impl Keyed for TradePoint {
    type Key = EntityId;

    fn key(&self) -> EntityId {
        self.id.clone()
    }
}

impl Keyed for PricePoint {
    type Key = Symbol;

    fn key(&self) -> Symbol {
        self.symbol.clone()
    }
}

impl Keyed for Position {
    type Key = Symbol;

    fn key(&self) -> Symbol {
        self.symbol.clone()
    }
}

/// Outcome of [`EntityTable::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Mapping keyed by entity identity.
///
/// Iteration order is the order of first appearance; updating a row never moves it, removing a
/// row closes the gap without reordering the rest.
#[derive(Debug, Clone)]
pub struct EntityTable<T: Keyed> {
    rows: IndexMap<T::Key, T>,
}

impl<T> EntityTable<T>
where
    T: Keyed + Clone,
{
    pub fn new() -> Self {
        Self {
            rows: IndexMap::new(),
        }
    }

    /// Replace the whole contents with a snapshot; a repeated key keeps its first position and
    /// its last value.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) {
        self.rows.clear();
        for item in items {
            self.rows.insert(item.key(), item);
        }
    }

    /// Insert an unknown key at the end, or overwrite a known key in place.
    pub fn upsert(&mut self, item: T) -> Upsert {
        match self.rows.insert(item.key(), item) {
            Some(_) => Upsert::Updated,
            None => Upsert::Inserted,
        }
    }

    /// Drop the row entirely. Unknown keys are a no-op.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        self.rows.shift_remove(key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Current rows in order of first appearance
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    /// Owned copy of the rows in order of first appearance
    pub fn to_vec(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

impl<T> Default for EntityTable<T>
where
    T: Keyed + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
