use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::{KeyValueStore, StoreError};

const CHANGE_FEED_CAPACITY: usize = 64;

/// In-process store. Clones are handles onto the same map.
///
/// Each handle behaves like one browser tab over shared local storage: writes made
/// through any handle are announced on every handle's [`KeyValueStore::watch`] feed.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    fn announce(&self, key: &str) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(key.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MemoryStore").field("keys", &len).finish()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.announce(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            self.announce(key);
        }
        Ok(())
    }

    fn watch(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.inner.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set("k", "v").unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        b.remove("k").unwrap();
        assert_eq!(a.get("k").unwrap(), None);
    }

    #[tokio::test]
    async fn writes_are_announced_to_every_handle() {
        let a = MemoryStore::new();
        let b = a.clone();
        let mut feed = b.watch().expect("memory store has a change feed");

        a.set("requests", "{}").unwrap();
        assert_eq!(feed.recv().await.unwrap(), "requests");
    }

    #[tokio::test]
    async fn removing_a_missing_key_is_silent() {
        let store = MemoryStore::new();
        let mut feed = store.watch().unwrap();
        store.remove("absent").unwrap();
        assert!(feed.try_recv().is_err());
    }
}
