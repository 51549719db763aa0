//! [`Table`] [Entry API](crate::table::Table::entry).
//!
//! The entry API allows for more complex methods of getting, setting,
//! updating and removing keys and their values with a single lookup.

use crate::error::TableError;
use crate::table::Table;
use crate::value::Value;

/// A view into a single entry in a table, which may either be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`Table`].
///
/// [`entry`]: Table::entry
#[derive(Debug)]
pub enum Entry<'a> {
    /// An occupied entry.
    Occupied(OccupiedEntry<'a>),

    /// A vacant entry.
    Vacant(VacantEntry<'a>),
}

/// A view into an occupied entry in a [`Table`]. Part of the [`Entry`] enum.
#[derive(Debug)]
pub struct OccupiedEntry<'a> {
    table: &'a mut Table,
    key: Value,
}

/// A view into a vacant entry in a [`Table`]. Part of the [`Entry`] enum.
#[derive(Debug)]
pub struct VacantEntry<'a> {
    table: &'a mut Table,
    key: Value,
}

impl Table {
    /// Gets the given key's corresponding entry for in-place manipulation.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidKey`] if `key` is nil or NaN.
    pub fn entry(&mut self, key: Value) -> Result<Entry<'_>, TableError> {
        if key.is_nil() || key.is_nan() {
            return Err(TableError::InvalidKey);
        }
        if self.get(&key).is_nil() {
            Ok(Entry::Vacant(VacantEntry { table: self, key }))
        } else {
            Ok(Entry::Occupied(OccupiedEntry { table: self, key }))
        }
    }
}

impl<'a> Entry<'a> {
    /// Ensures a value is in the entry by inserting the default if empty,
    /// and returns a mutable reference to the value in the entry.
    #[inline]
    pub fn or_insert(self, default: Value) -> &'a mut Value {
        match self {
            Self::Occupied(entry) => entry.into_mut(),
            Self::Vacant(entry) => entry.insert(default),
        }
    }

    /// Ensures a value is in the entry by inserting the result of the
    /// default function if empty, and returns a mutable reference to the
    /// value in the entry.
    #[inline]
    pub fn or_insert_with<F: FnOnce() -> Value>(self, default: F) -> &'a mut Value {
        match self {
            Self::Occupied(entry) => entry.into_mut(),
            Self::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Returns a reference to this entry's key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Value {
        match self {
            Self::Occupied(entry) => &entry.key,
            Self::Vacant(entry) => &entry.key,
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts into the table.
    #[inline]
    pub fn and_modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut Value),
    {
        match self {
            Self::Occupied(mut entry) => {
                f(entry.get_mut());
                Self::Occupied(entry)
            }
            Self::Vacant(entry) => Self::Vacant(entry),
        }
    }
}

impl<'a> OccupiedEntry<'a> {
    /// Gets a reference to the key in the entry.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Gets the value in the entry.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Value {
        self.table.get(&self.key)
    }

    /// Gets a mutable reference to the value in the entry.
    #[inline]
    pub fn get_mut(&mut self) -> &mut Value {
        self.table
            .set(self.key.clone())
            .expect("occupied entry key was already valid")
    }

    /// Converts the `OccupiedEntry` into a mutable reference to the value in
    /// the entry with a lifetime bound to the table itself.
    #[inline]
    pub fn into_mut(self) -> &'a mut Value {
        self.table
            .set(self.key)
            .expect("occupied entry key was already valid")
    }

    /// Sets the value of the entry, and returns the entry's old value.
    #[inline]
    pub fn insert(&mut self, value: Value) -> Value {
        std::mem::replace(self.get_mut(), value)
    }

    /// Takes the value out of the entry, leaving a dead-key tombstone, and
    /// returns it.
    #[inline]
    pub fn remove(self) -> Value {
        let old = self.table.get(&self.key);
        self.table.remove(&self.key);
        old
    }
}

impl<'a> VacantEntry<'a> {
    /// Gets a reference to the key that would be used when inserting a value
    /// through the `VacantEntry`.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Take ownership of the key.
    #[inline]
    #[must_use]
    pub fn into_key(self) -> Value {
        self.key
    }

    /// Sets the value of the entry with the `VacantEntry`'s key, and returns
    /// a mutable reference to it.
    #[inline]
    pub fn insert(self, value: Value) -> &'a mut Value {
        let slot = self
            .table
            .set(self.key)
            .expect("vacant entry key was validated on construction");
        *slot = value;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn or_insert_creates_missing_entry() {
        let mut table = Table::new(0, 0).unwrap();
        *table.entry(Value::Number(1.0)).unwrap().or_insert(Value::Boolean(true)) = Value::Boolean(true);
        assert!(matches!(table.get(&Value::Number(1.0)), Value::Boolean(true)));
    }

    #[test]
    fn or_insert_leaves_existing_entry_untouched() {
        let mut table = Table::new(0, 0).unwrap();
        table.set(Value::Number(1.0)).unwrap();
        *table.set(Value::Number(1.0)).unwrap() = Value::Number(7.0);
        let v = table.entry(Value::Number(1.0)).unwrap().or_insert(Value::Number(99.0));
        assert!(matches!(v, Value::Number(n) if *n == 7.0));
    }

    #[test]
    fn and_modify_only_runs_on_occupied() {
        let mut table = Table::new(0, 0).unwrap();
        *table.set(Value::Number(1.0)).unwrap() = Value::Number(1.0);
        table
            .entry(Value::Number(1.0))
            .unwrap()
            .and_modify(|v| *v = Value::Number(2.0))
            .or_insert(Value::Number(0.0));
        assert!(matches!(table.get(&Value::Number(1.0)), Value::Number(n) if n == 2.0));
    }
}
