//! Insertion-ordered map object.
//!
//! Storage strategy: a `hashbrown::HashTable<usize>` maps entry hashes to
//! indices in a dense entry vector, which preserves insertion order across
//! rehashes and makes positional access O(1). Keys must be hashable
//! (null/bool/number/string); key equality is structural.

use hashbrown::HashTable;

use crate::{
    errors::{RunError, RunResult},
    heap::Heap,
    value::{Value, value_hash, values_equal},
};

#[derive(Debug, Default)]
pub(crate) struct Map {
    /// Hash table of indices into `entries`.
    indices: HashTable<usize>,
    /// Dense entry storage in insertion order.
    entries: Vec<MapEntry>,
}

#[derive(Debug)]
struct MapEntry {
    key: Value,
    value: Value,
    /// Stored so rehashing never needs to re-derive key hashes.
    hash: u64,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: HashTable::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.entries.clear();
    }

    fn key_hash(heap: &Heap, key: &Value) -> RunResult<u64> {
        value_hash(heap, key)
            .ok_or_else(|| RunError::runtime(format!("key of type {} is not hashable", key.kind_name())))
    }

    /// Inserts or updates a key. Insertion order is preserved: updating an
    /// existing key keeps its original position.
    pub fn set(&mut self, heap: &Heap, key: Value, value: Value) -> RunResult<()> {
        let hash = Self::key_hash(heap, &key)?;
        let entries = &mut self.entries;
        let found = self
            .indices
            .find(hash, |&ix| entries[ix].hash == hash && values_equal(heap, &entries[ix].key, &key));
        match found {
            Some(&ix) => entries[ix].value = value,
            None => {
                let ix = entries.len();
                entries.push(MapEntry { key, value, hash });
                self.indices
                    .insert_unique(hash, ix, |&stored| entries[stored].hash);
            }
        }
        Ok(())
    }

    pub fn get(&self, heap: &Heap, key: &Value) -> RunResult<Option<Value>> {
        let Some(hash) = value_hash(heap, key) else {
            return Err(RunError::runtime(format!(
                "key of type {} is not hashable",
                key.kind_name()
            )));
        };
        let entries = &self.entries;
        let found = self
            .indices
            .find(hash, |&ix| entries[ix].hash == hash && values_equal(heap, &entries[ix].key, key));
        Ok(found.map(|&ix| entries[ix].value))
    }

    /// Positional access in insertion order.
    pub fn get_at(&self, index: usize) -> Option<(Value, Value)> {
        self.entries.get(index).map(|entry| (entry.key, entry.value))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|entry| entry.key).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|entry| entry.value).collect()
    }

    /// Pushes every key and value onto the GC mark worklist.
    pub fn extend_mark_worklist(&self, work: &mut Vec<Value>) {
        for entry in &self.entries {
            work.push(entry.key);
            work.push(entry.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn preserves_insertion_order_across_growth() {
        let mut heap = Heap::new();
        let mut map = Map::new();
        for i in 0..100 {
            let key = heap.alloc_str(&format!("key{i}")).unwrap();
            map.set(&heap, key, Value::Number(f64::from(i))).unwrap();
        }
        for i in 0..100 {
            let (key, value) = map.get_at(i).unwrap();
            let Value::Str(id) = key else { panic!("expected string key") };
            assert_eq!(heap.str_value(id), format!("key{i}"));
            assert_eq!(value, Value::Number(i as f64));
        }
    }

    #[test]
    fn update_keeps_position() {
        let mut heap = Heap::new();
        let mut map = Map::new();
        let a = heap.alloc_str("a").unwrap();
        let b = heap.alloc_str("b").unwrap();
        map.set(&heap, a, Value::Number(1.0)).unwrap();
        map.set(&heap, b, Value::Number(2.0)).unwrap();
        // a fresh string object with the same bytes hits the same entry
        let a2 = heap.alloc_str("a").unwrap();
        map.set(&heap, a2, Value::Number(3.0)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get_at(0).unwrap().1, Value::Number(3.0));
    }

    #[test]
    fn mixed_key_kinds() {
        let heap = Heap::new();
        let mut map = Map::new();
        map.set(&heap, Value::Number(1.0), Value::Bool(true)).unwrap();
        map.set(&heap, Value::Bool(true), Value::Number(2.0)).unwrap();
        map.set(&heap, Value::Null, Value::Number(3.0)).unwrap();
        assert_eq!(map.get(&heap, &Value::Number(1.0)).unwrap(), Some(Value::Bool(true)));
        assert_eq!(map.get(&heap, &Value::Bool(true)).unwrap(), Some(Value::Number(2.0)));
        assert_eq!(map.get(&heap, &Value::Null).unwrap(), Some(Value::Number(3.0)));
    }

    #[test]
    fn unhashable_key_is_an_error() {
        let mut heap = Heap::new();
        let arr = heap.alloc_array(vec![]).unwrap();
        let mut map = Map::new();
        let err = map.set(&heap, arr, Value::Null).unwrap_err();
        assert!(err.message.contains("not hashable"));
    }
}
