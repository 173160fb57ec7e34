//! In-memory region store
//!
//! Regions are created on first write. Reads against a missing region
//! behave like reads against an empty one.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct RegionStore {
    regions: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, region: &str, key: &str) -> Option<Bytes> {
        self.read()
            .get(region)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Insert or replace an entry, returning the previous value
    pub fn put(&self, region: &str, key: &str, value: Bytes) -> Option<Bytes> {
        self.write()
            .entry(region.to_string())
            .or_default()
            .insert(key.to_string(), value)
    }

    pub fn remove(&self, region: &str, key: &str) -> Option<Bytes> {
        self.write()
            .get_mut(region)
            .and_then(|entries| entries.remove(key))
    }

    pub fn size(&self, region: &str) -> usize {
        self.read().get(region).map_or(0, HashMap::len)
    }

    /// Keys of a region in sorted order
    pub fn keys(&self, region: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .read()
            .get(region)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Drop every entry of a region, returning how many were removed
    pub fn clear(&self, region: &str) -> usize {
        self.write()
            .get_mut(region)
            .map(|entries| {
                let n = entries.len();
                entries.clear();
                n
            })
            .unwrap_or(0)
    }

    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<String, Bytes>>> {
        self.regions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<String, Bytes>>> {
        self.regions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = RegionStore::new();
        assert!(store.get("orders", "1").is_none());

        assert!(store.put("orders", "1", Bytes::from_static(b"a")).is_none());
        assert_eq!(
            store.put("orders", "1", Bytes::from_static(b"b")),
            Some(Bytes::from_static(b"a"))
        );
        assert_eq!(store.get("orders", "1"), Some(Bytes::from_static(b"b")));

        assert_eq!(store.remove("orders", "1"), Some(Bytes::from_static(b"b")));
        assert!(store.remove("orders", "1").is_none());
        assert!(store.remove("missing", "1").is_none());
    }

    #[test]
    fn test_region_listing() {
        let store = RegionStore::new();
        store.put("users", "b", Bytes::from_static(b"2"));
        store.put("users", "a", Bytes::from_static(b"1"));
        store.put("orders", "x", Bytes::from_static(b"3"));

        assert_eq!(store.region_names(), vec!["orders", "users"]);
        assert_eq!(store.keys("users"), vec!["a", "b"]);
        assert_eq!(store.size("users"), 2);
        assert_eq!(store.size("missing"), 0);

        assert_eq!(store.clear("users"), 2);
        assert_eq!(store.size("users"), 0);
        assert_eq!(store.clear("missing"), 0);
    }
}
