//! Open-addressed, linear-probed hash table keyed by interned string
//! handles, ported directly from `original_source/cLox/compiler/table.c`
//! (spec.md §3/§4.3 mandate this exact representation — tombstones,
//! `capacity = 2^n - 1` masking, 0.6 load factor — rather than the
//! teacher's `std::collections::HashMap`, since the growth/tombstone
//! behavior is itself a testable property of the language, not an
//! implementation detail the teacher's choice of map can stand in for).

use crate::gc::Gc;
use crate::value::Value;

const MAX_LOAD: f64 = 0.6;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<Gc>,
    value: Value,
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry_index(entries: &[Entry], capacity: usize, key_hash: u32, eq: impl Fn(Gc) -> bool) -> usize {
        let mut index = (key_hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Bool(true)) {
                        // tombstone
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if eq(k) => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = vec![
            Entry {
                key: None,
                value: Value::Nil,
            };
            new_capacity
        ];

        let mut live = 0;
        for entry in self.entries.iter() {
            if let Some(key) = entry.key {
                let idx = Self::find_entry_index(&new_entries, new_capacity, key_hash(key), |k| k == key);
                new_entries[idx] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                live += 1;
            }
        }

        self.entries = new_entries;
        self.count = live;
    }

    /// Inserts `value` under `key`, returning whether `key` is new.
    pub fn set(&mut self, key: Gc, value: Value) -> bool {
        if self.capacity() == 0 || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_cap = grow_capacity(self.capacity());
            self.grow(new_cap);
        }

        let hash = key_hash(key);
        let idx = Self::find_entry_index(&self.entries, self.capacity(), hash, |k| k == key);
        let is_new_key = self.entries[idx].key.is_none();
        if is_new_key && matches!(self.entries[idx].value, Value::Nil) {
            self.count += 1;
        }
        self.entries[idx] = Entry {
            key: Some(key),
            value,
        };
        is_new_key
    }

    pub fn get(&self, key: Gc) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let idx = Self::find_entry_index(&self.entries, self.capacity(), key_hash(key), |k| k == key);
        self.entries[idx].key.map(|_| self.entries[idx].value)
    }

    pub fn delete(&mut self, key: Gc) -> bool {
        if self.count == 0 {
            return false;
        }
        let idx = Self::find_entry_index(&self.entries, self.capacity(), key_hash(key), |k| k == key);
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry {
            key: None,
            value: Value::Bool(true),
        };
        true
    }

    pub fn contains_key(&self, key: Gc) -> bool {
        self.get(key).is_some()
    }

    /// Used to intern strings: looks a string up by content rather than by
    /// an already-existing handle, matching `tableFindString`.
    pub fn find_string(&self, text: &str, hash: u32) -> Option<Gc> {
        if self.count == 0 || self.capacity() == 0 {
            return None;
        }
        let mut index = (hash as usize) & (self.capacity() - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !matches!(entry.value, Value::Bool(true)) {
                        return None;
                    }
                }
                Some(key) => {
                    if let crate::object::ObjKind::String(s) = key.kind() {
                        if s.hash == hash && s.value == text {
                            return Some(key);
                        }
                    }
                }
            }
            index = (index + 1) & (self.capacity() - 1);
        }
    }

    pub fn add_all(&mut self, from: &Table) {
        for entry in from.entries.iter() {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Drops every entry whose key lost its GC mark, per spec.md §4.5
    /// "Intern handling".
    pub fn remove_unmarked(&mut self) {
        let dead: Vec<Gc> = self
            .entries
            .iter()
            .filter_map(|e| e.key)
            .filter(|k| !k.is_marked())
            .collect();
        for key in dead {
            self.delete(key);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (Gc, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

fn key_hash(key: Gc) -> u32 {
    match key.kind() {
        crate::object::ObjKind::String(s) => s.hash,
        _ => unreachable!("table keys are always interned strings"),
    }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity == 0 {
        8
    } else {
        capacity * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;
    use crate::object::ObjKind;

    struct NoRoots;
    impl crate::gc::RootSource for NoRoots {
        fn mark_roots(&self, _heap: &mut Heap) {}
    }

    #[test]
    fn set_get_and_tombstone_delete() {
        let mut heap = Heap::new();
        let roots = NoRoots;
        let a = heap.intern_str("a", &roots);
        let b = heap.intern_str("b", &roots);

        let mut table = Table::new();
        assert!(table.set(a, Value::Number(1.0)));
        assert!(!table.set(a, Value::Number(2.0)));
        assert_eq!(table.get(a), Some(Value::Number(2.0)));

        assert!(table.delete(a));
        assert_eq!(table.get(a), None);
        // probing past the tombstone still finds `b`.
        table.set(b, Value::Number(3.0));
        assert_eq!(table.get(b), Some(Value::Number(3.0)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap = Heap::new();
        let roots = NoRoots;
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..100 {
            let key = heap.intern_str(&format!("k{i}"), &roots);
            table.set(key, Value::Number(i as f64));
            keys.push(key);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn identical_bytes_intern_to_same_object() {
        let mut heap = Heap::new();
        let roots = NoRoots;
        let a = heap.intern_str("hello", &roots);
        let b = heap.intern_str("hello", &roots);
        assert!(a == b);
        match a.kind() {
            ObjKind::String(s) => assert_eq!(s.value, "hello"),
            _ => panic!("expected string"),
        }
    }
}
