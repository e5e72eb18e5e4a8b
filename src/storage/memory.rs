//! In-memory storage area.

use super::Storage;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Process-lifetime key/value map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    name: String,
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let storage = MemoryStorage::new("tab");
        assert!(storage.is_empty());

        storage.set("k", "v1").unwrap();
        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(storage.len(), 1);

        assert!(storage.remove("k").unwrap());
        assert!(!storage.remove("k").unwrap());
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let storage = MemoryStorage::new("tab");
        storage.set("b", "2").unwrap();
        storage.set("a", "1").unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["a", "b"]);
    }
}
