use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Name-keyed map of live sessions. Insert and remove are atomic per key; there is
/// no registry-wide lock.
#[derive(Debug)]
pub struct Registry<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `name` only if nothing is registered there yet.
    pub fn try_register(&self, name: &str, value: Arc<T>) -> bool {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn try_remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries.remove(name).map(|(_, value)| value)
    }

    /// Removes the entry only if it is still this exact instance.
    pub fn remove_if_same(&self, name: &str, value: &Arc<T>) -> bool {
        self.entries
            .remove_if(name, |_, current| Arc::ptr_eq(current, value))
            .is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn sessions(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
