//! Attribute store: the session's value cache.
//!
//! One [`StoreCell`] per `(attribute, class, ordinal)`, created lazily with the
//! descriptor default and `is_valid = false`. Cells are independent; there are
//! no cross-cell transactions. The map sits behind a `parking_lot::Mutex`, so
//! each read-modify-write on a cell is atomic.
//!
//! Rollback works on snapshots: the facade takes [`AttributeStore::snapshot`]
//! before a write and hands it back to [`AttributeStore::restore`] when the
//! device refuses the value. A snapshot of an untouched cell is `None`, and
//! restoring `None` removes the cell again, so the store ends up exactly as it
//! was.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::capability::{CapabilityClass, Ordinal};
use crate::descriptor::AttributeId;
use crate::value::AttributeValue;

/// Address of one store cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    /// Attribute the cell caches.
    pub attribute: AttributeId,
    /// Class the ordinal was resolved in.
    pub class: CapabilityClass,
    /// Instance ordinal.
    pub ordinal: Ordinal,
}

impl CellKey {
    /// Build a key.
    pub fn new(attribute: AttributeId, class: CapabilityClass, ordinal: Ordinal) -> Self {
        Self {
            attribute,
            class,
            ordinal,
        }
    }
}

/// Cached state of one attribute on one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCell {
    /// Last known value.
    pub value: AttributeValue,
    /// Value came from an accepted Set or a device query.
    pub is_valid: bool,
    /// Last accepted input differed from `value`.
    pub was_coerced: bool,
    /// Value has not been flushed to the device yet.
    pub is_dirty: bool,
}

impl StoreCell {
    fn fresh(default: &AttributeValue) -> Self {
        Self {
            value: default.clone(),
            is_valid: false,
            was_coerced: false,
            is_dirty: false,
        }
    }

    /// Bitwise equality, including the value's float bits.
    pub fn same_bits(&self, other: &StoreCell) -> bool {
        self.value.same_bits(&other.value)
            && self.is_valid == other.is_valid
            && self.was_coerced == other.was_coerced
            && self.is_dirty == other.is_dirty
    }
}

/// Thread-safe cell map.
#[derive(Debug, Default)]
pub struct AttributeStore {
    cells: Mutex<HashMap<CellKey, StoreCell>>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cell, creating it from `default` on first touch.
    pub fn read(&self, key: CellKey, default: &AttributeValue) -> StoreCell {
        self.cells
            .lock()
            .entry(key)
            .or_insert_with(|| StoreCell::fresh(default))
            .clone()
    }

    /// Cell as [`AttributeStore::read`] would return it, without creating it.
    pub fn peek(&self, key: CellKey, default: &AttributeValue) -> StoreCell {
        self.cells
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| StoreCell::fresh(default))
    }

    /// Current cell, without creating it.
    pub fn snapshot(&self, key: CellKey) -> Option<StoreCell> {
        self.cells.lock().get(&key).cloned()
    }

    /// Put back a snapshot taken with [`AttributeStore::snapshot`].
    pub fn restore(&self, key: CellKey, snapshot: Option<StoreCell>) {
        let mut cells = self.cells.lock();
        match snapshot {
            Some(cell) => {
                cells.insert(key, cell);
            }
            None => {
                cells.remove(&key);
            }
        }
    }

    /// Record an accepted Set.
    pub fn write(&self, key: CellKey, value: AttributeValue, coerced: bool) {
        self.cells.lock().insert(
            key,
            StoreCell {
                value,
                is_valid: true,
                was_coerced: coerced,
                is_dirty: true,
            },
        );
    }

    /// Record a value read back from the device.
    pub fn write_from_device(&self, key: CellKey, value: AttributeValue) {
        self.cells.lock().insert(
            key,
            StoreCell {
                value,
                is_valid: true,
                was_coerced: false,
                is_dirty: false,
            },
        );
    }

    /// Mark a cell as flushed.
    pub fn clear_dirty(&self, key: CellKey) {
        if let Some(cell) = self.cells.lock().get_mut(&key) {
            cell.is_dirty = false;
        }
    }

    /// Drop every cell of one instance. Returns the number of cells dropped.
    pub fn invalidate_instance(&self, class: CapabilityClass, ordinal: Ordinal) -> usize {
        let mut cells = self.cells.lock();
        let before = cells.len();
        cells.retain(|key, _| !(key.class == class && key.ordinal == ordinal));
        before - cells.len()
    }

    /// Force the next Get of a clean cell to go to the device.
    ///
    /// Dirty cells carry pending writes and are left alone.
    pub fn invalidate(&self, key: CellKey) {
        if let Some(cell) = self.cells.lock().get_mut(&key) {
            if !cell.is_dirty {
                cell.is_valid = false;
            }
        }
    }

    /// [`AttributeStore::invalidate`] for every cell.
    pub fn invalidate_all(&self) {
        for cell in self.cells.lock().values_mut() {
            if !cell.is_dirty {
                cell.is_valid = false;
            }
        }
    }

    /// Pending writes, ordered by key.
    pub fn dirty_cells(&self) -> Vec<(CellKey, AttributeValue)> {
        let mut dirty: Vec<_> = self
            .cells
            .lock()
            .iter()
            .filter(|(_, cell)| cell.is_dirty)
            .map(|(key, cell)| (*key, cell.value.clone()))
            .collect();
        dirty.sort_by_key(|(key, _)| *key);
        dirty
    }

    /// Number of materialised cells.
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    /// Whether no cell has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(attribute: u32, ordinal: u32) -> CellKey {
        CellKey::new(AttributeId(attribute), CapabilityClass::Window, Ordinal(ordinal))
    }

    #[test]
    fn test_first_read_creates_invalid_default_cell() {
        let store = AttributeStore::new();
        let cell = store.read(key(1, 0), &AttributeValue::Real(-20.0));
        assert_eq!(cell.value, AttributeValue::Real(-20.0));
        assert!(!cell.is_valid);
        assert!(!cell.is_dirty);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_peek_does_not_materialise() {
        let store = AttributeStore::new();
        let cell = store.peek(key(1, 0), &AttributeValue::Integer(7));
        assert_eq!(cell.value, AttributeValue::Integer(7));
        assert!(store.is_empty());
    }

    #[test]
    fn test_write_then_clear_dirty() {
        let store = AttributeStore::new();
        store.write(key(1, 0), AttributeValue::Real(30.0), true);
        let cell = store.read(key(1, 0), &AttributeValue::Real(0.0));
        assert!(cell.is_valid && cell.is_dirty && cell.was_coerced);

        store.clear_dirty(key(1, 0));
        assert!(!store.read(key(1, 0), &AttributeValue::Real(0.0)).is_dirty);
    }

    #[test]
    fn test_restore_none_removes_cell() {
        let store = AttributeStore::new();
        let snapshot = store.snapshot(key(1, 0));
        store.write(key(1, 0), AttributeValue::Real(5.0), false);
        store.restore(key(1, 0), snapshot);
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_some_is_bit_identical() {
        let store = AttributeStore::new();
        store.write_from_device(key(1, 0), AttributeValue::Real(-0.0));
        let snapshot = store.snapshot(key(1, 0));
        store.write(key(1, 0), AttributeValue::Real(0.0), false);
        store.restore(key(1, 0), snapshot.clone());
        let restored = store.snapshot(key(1, 0)).unwrap();
        assert!(restored.same_bits(&snapshot.unwrap()));
    }

    #[test]
    fn test_invalidate_instance_only_touches_that_instance() {
        let store = AttributeStore::new();
        store.write(key(1, 0), AttributeValue::Integer(1), false);
        store.write(key(2, 0), AttributeValue::Integer(2), false);
        store.write(key(1, 1), AttributeValue::Integer(3), false);
        store.write(
            CellKey::new(AttributeId(9), CapabilityClass::Marker, Ordinal(0)),
            AttributeValue::Flag(true),
            false,
        );

        assert_eq!(store.invalidate_instance(CapabilityClass::Window, Ordinal(0)), 2);
        assert_eq!(store.len(), 2);
        assert!(store.snapshot(key(1, 1)).is_some());
    }

    #[test]
    fn test_invalidate_all_keeps_pending_writes() {
        let store = AttributeStore::new();
        store.write_from_device(key(1, 0), AttributeValue::Integer(1));
        store.write(key(2, 0), AttributeValue::Integer(2), false);
        store.invalidate_all();

        assert!(!store.snapshot(key(1, 0)).unwrap().is_valid);
        assert!(store.snapshot(key(2, 0)).unwrap().is_valid);
        assert_eq!(store.dirty_cells(), vec![(key(2, 0), AttributeValue::Integer(2))]);
    }
}
