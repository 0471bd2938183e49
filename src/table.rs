//! Row-keyed table with the map/join/reduce surface the protocol consumes.
//!
//! Stands in for the distributed table engine: rows are kept ordered by [RowId] and every operation
//! runs locally.

use crate::error::DesyncError;
use crate::feature::RowId;
use std::collections::BTreeMap;

/// Ordered table of `V` keyed by [RowId].
#[derive(Clone, Debug, PartialEq)]
pub struct Table<V> {
    rows: BTreeMap<RowId, V>,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<V> FromIterator<(RowId, V)> for Table<V> {
    fn from_iter<I: IntoIterator<Item = (RowId, V)>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<V> Table<V> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row.
    pub fn insert(&mut self, id: RowId, value: V) -> Option<V> {
        self.rows.insert(id, value)
    }

    /// Row lookup.
    pub fn get(&self, id: RowId) -> Option<&V> {
        self.rows.get(&id)
    }

    /// Number of rows.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row ids in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.keys().copied()
    }

    /// Rows in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &V)> + '_ {
        self.rows.iter().map(|(k, v)| (*k, v))
    }

    /// Apply `f` to every value.
    pub fn map_values<W, F>(&self, mut f: F) -> Table<W>
    where
        F: FnMut(&V) -> W,
    {
        Table {
            rows: self.rows.iter().map(|(k, v)| (*k, f(v))).collect(),
        }
    }

    /// Fallible [Table::map_values].
    pub fn try_map_values<W, E, F>(&self, mut f: F) -> Result<Table<W>, E>
    where
        F: FnMut(&V) -> Result<W, E>,
    {
        let rows = self
            .rows
            .iter()
            .map(|(k, v)| Ok((*k, f(v)?)))
            .collect::<Result<BTreeMap<_, _>, E>>()?;
        Ok(Table { rows })
    }

    /// Apply `f` to every row, producing arbitrary items.
    pub fn map<U, F>(&self, mut f: F) -> Vec<U>
    where
        F: FnMut(RowId, &V) -> U,
    {
        self.rows.iter().map(|(k, v)| f(*k, v)).collect()
    }

    /// Inner join on row id.
    pub fn join<W, U, F>(&self, other: &Table<W>, mut f: F) -> Table<U>
    where
        F: FnMut(&V, &W) -> U,
    {
        Table {
            rows: self
                .rows
                .iter()
                .filter_map(|(k, v)| other.rows.get(k).map(|w| (*k, f(v, w))))
                .collect(),
        }
    }

    /// Join that requires both sides to hold exactly the same row ids.
    ///
    /// The first row present on one side only is reported as [DesyncError::MissingRow].
    pub fn try_join<W, U, E, F>(&self, other: &Table<W>, mut f: F) -> Result<Table<U>, E>
    where
        F: FnMut(&V, &W) -> Result<U, E>,
        E: From<DesyncError>,
    {
        if let Some(k) = other.rows.keys().find(|k| !self.rows.contains_key(k)) {
            return Err(DesyncError::MissingRow(*k).into());
        }

        let rows = self
            .rows
            .iter()
            .map(|(k, v)| {
                let w = other.rows.get(k).ok_or(DesyncError::MissingRow(*k))?;
                Ok((*k, f(v, w)?))
            })
            .collect::<Result<BTreeMap<_, _>, E>>()?;
        Ok(Table { rows })
    }

    /// Fold all values with `f`; `None` on an empty table.
    pub fn reduce<F>(self, f: F) -> Option<V>
    where
        F: FnMut(V, V) -> V,
    {
        self.rows.into_values().reduce(f)
    }

    /// All rows in ascending id order.
    pub fn collect(self) -> Vec<(RowId, V)> {
        self.rows.into_iter().collect()
    }
}

impl<V: Clone> Table<V> {
    /// Sub-table with the given rows, all of which must be present.
    pub fn select(&self, ids: &[RowId]) -> Result<Table<V>, DesyncError> {
        ids.iter()
            .map(|&id| {
                self.rows
                    .get(&id)
                    .map(|v| (id, v.clone()))
                    .ok_or(DesyncError::MissingRow(id))
            })
            .collect()
    }
}
