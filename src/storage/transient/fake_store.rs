// In-memory Transient Store used by tests and local/dev runs without Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::StorageError;

use super::TransientStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, std::collections::HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-memory stand-in for the Transient Store. Single-process only; fine
/// for tests and the `FakeLlmGateway`-backed end-to-end scenarios.
pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransientStore for FakeStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .strings
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone()))
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let occupied = inner.strings.get(key).map(Self::is_live).unwrap_or(false);
        if occupied {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        inner.sets.remove(key);
        inner.lists.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        from: isize,
        to: isize,
    ) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let start = norm(from);
        let end = if to < 0 { (len + to + 1).max(0) } else { (to + 1).min(len) };
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((end - start) as usize)
            .cloned()
            .collect())
    }

    async fn list_trim(&self, key: &str, max_len: isize) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.lists.get_mut(key) {
            list.truncate(max_len.max(0) as usize);
        }
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StorageError> {
        // TTL tracking for lists/sets is not needed by the test suite.
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_is_a_lock() {
        let store = FakeStore::new();
        assert!(store.set_if_absent("lock:1", "owner-a", 60).await.unwrap());
        assert!(!store.set_if_absent("lock:1", "owner-b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_members_roundtrip() {
        let store = FakeStore::new();
        store.set_add("room:1:players", "p1").await.unwrap();
        store.set_add("room:1:players", "p2").await.unwrap();
        let mut members = store.set_members("room:1:players").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["p1".to_string(), "p2".to_string()]);
        store.set_remove("room:1:players", "p1").await.unwrap();
        assert_eq!(store.set_members("room:1:players").await.unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn test_list_push_front_and_range_and_trim() {
        let store = FakeStore::new();
        for v in ["a", "b", "c"] {
            store.list_push_front("hist", v).await.unwrap();
        }
        // most recent push is at the front
        assert_eq!(
            store.list_range("hist", 0, -1).await.unwrap(),
            vec!["c".to_string(), "b".to_string(), "a".to_string()]
        );
        store.list_trim("hist", 2).await.unwrap();
        assert_eq!(
            store.list_range("hist", 0, -1).await.unwrap(),
            vec!["c".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_flush_all_clears_everything() {
        let store = FakeStore::new();
        store.set_string("k", "v", None).await.unwrap();
        store.flush_all().await.unwrap();
        assert_eq!(store.get_string("k").await.unwrap(), None);
    }
}
