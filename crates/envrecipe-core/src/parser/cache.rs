use std::sync::Mutex;

use indexmap::IndexMap;

/// Least-recently-used map from exact recipe text to its parsed document.
///
/// The cache is an optimization only: a capacity of zero disables it and
/// every lookup misses.
#[derive(Debug)]
pub struct ParseCache<T> {
    capacity: usize,
    entries: Mutex<IndexMap<String, T>>,
}

impl<T: Clone> ParseCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, source: &str) -> Option<T> {
        if self.capacity == 0 {
            return None;
        }
        let mut entries = self.entries.lock().ok()?;
        let value = entries.shift_remove(source)?;
        entries.insert(source.to_string(), value.clone());
        Some(value)
    }

    pub fn insert(&self, source: &str, value: T) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.shift_remove(source);
        entries.insert(source.to_string(), value);
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
