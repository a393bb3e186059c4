//! Open-addressed hash table specialized for `Gc<ObjString>` keys.
//!
//! Used for globals, instance fields, class method tables, and (via
//! [`Table::find_string`]) the interner's weak string index. Linear
//! probing, power-of-two capacity, 0.75 load factor; deletions leave a
//! tombstone slot that keeps probe chains intact until the next growth.

use crate::object::{fnv1a_hash, Gc, ObjString};
use crate::value::Value;

const LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(Gc<ObjString>, Value),
}

#[derive(Clone)]
pub struct Table {
    entries: Vec<Slot>,
    /// Occupied entries plus tombstones, used to decide when to grow
    /// (mirrors the book's `count`, which never shrinks on delete).
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(..)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Returns the probe index of the slot that owns `key`, or the first
    /// tombstone/empty slot encountered if `key` isn't present.
    fn find_slot(entries: &[Slot], capacity: usize, key: Gc<ObjString>) -> usize {
        let mut index = (key.hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) if *k == key => return index,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = vec![Slot::Empty; new_capacity];
        let mut live = 0;
        for slot in self.entries.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let idx = Self::find_slot(&new_entries, new_capacity, key);
                new_entries[idx] = Slot::Occupied(key, value);
                live += 1;
            }
        }
        self.entries = new_entries;
        self.count = live;
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.grow(INITIAL_CAPACITY);
            return;
        }
        if (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR {
            self.grow(self.capacity() * 2);
        }
    }

    /// Inserts or overwrites `key`. Returns `true` if `key` was not
    /// previously present.
    pub fn set(&mut self, key: Gc<ObjString>, value: Value) -> bool {
        self.ensure_capacity();
        let idx = Self::find_slot(&self.entries, self.capacity(), key);
        let is_new = !matches!(self.entries[idx], Slot::Occupied(..));
        if is_new && !matches!(self.entries[idx], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[idx] = Slot::Occupied(key, value);
        is_new
    }

    pub fn get(&self, key: Gc<ObjString>) -> Option<Value> {
        if self.capacity() == 0 {
            return None;
        }
        let idx = Self::find_slot(&self.entries, self.capacity(), key);
        match &self.entries[idx] {
            Slot::Occupied(k, v) if *k == key => Some(*v),
            _ => None,
        }
    }

    pub fn delete(&mut self, key: Gc<ObjString>) -> bool {
        if self.capacity() == 0 {
            return false;
        }
        let idx = Self::find_slot(&self.entries, self.capacity(), key);
        match self.entries[idx] {
            Slot::Occupied(k, _) if k == key => {
                self.entries[idx] = Slot::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// The interning path: probes by hash first, only falling back to a
    /// byte comparison on a hash+length match. Stops at the first true
    /// empty (non-tombstone) slot.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<Gc<ObjString>> {
        if self.capacity() == 0 {
            return None;
        }
        debug_assert_eq!(hash, fnv1a_hash(bytes));
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match &self.entries[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _) if k.hash == hash && k.value.as_bytes() == bytes => {
                    return Some(*k)
                }
                _ => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Removes every entry whose key is unmarked. Used by the GC's
    /// weak-reference sweep of the string interner before the general
    /// sweep frees those strings.
    pub fn remove_unmarked_keys(&mut self) {
        for slot in &mut self.entries {
            if let Slot::Occupied(key, _) = slot {
                if !key.header().is_marked() {
                    *slot = Slot::Tombstone;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Gc<ObjString>, Value)> + '_ {
        self.entries.iter().filter_map(|s| match s {
            Slot::Occupied(k, v) => Some((*k, *v)),
            _ => None,
        })
    }

    /// Copies every entry from `other` into `self`, overwriting on
    /// collision. Used by `OP_INHERIT` to seed a subclass's method table.
    pub fn add_all_from(&mut self, other: &Table) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{GcConfig, Heap};

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn set_then_get_returns_value() {
        let mut heap = heap();
        let mut table = Table::new();
        let key = heap.intern("x");
        assert!(table.set(key, Value::Number(1.0)));
        assert_eq!(table.get(key), Some(Value::Number(1.0)));
    }

    #[test]
    fn set_existing_key_returns_false_and_overwrites() {
        let mut heap = heap();
        let mut table = Table::new();
        let key = heap.intern("x");
        table.set(key, Value::Number(1.0));
        assert!(!table.set(key, Value::Number(2.0)));
        assert_eq!(table.get(key), Some(Value::Number(2.0)));
    }

    #[test]
    fn delete_then_get_returns_none() {
        let mut heap = heap();
        let mut table = Table::new();
        let key = heap.intern("x");
        table.set(key, Value::Bool(true));
        assert!(table.delete(key));
        assert_eq!(table.get(key), None);
        assert!(!table.delete(key));
    }

    #[test]
    fn survives_growth_with_many_keys() {
        let mut heap = heap();
        let mut table = Table::new();
        let keys: Vec<_> = (0..200).map(|i| heap.intern(&format!("key{i}"))).collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(*key, Value::Number(i as f64));
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn tombstones_keep_probe_chains_intact() {
        let mut heap = heap();
        let mut table = Table::new();
        let a = heap.intern("a");
        let b = heap.intern("b");
        table.set(a, Value::Number(1.0));
        table.set(b, Value::Number(2.0));
        table.delete(a);
        assert_eq!(table.get(b), Some(Value::Number(2.0)));
    }
}
