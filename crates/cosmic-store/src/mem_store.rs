use crate::{HostStorage, KvStore, Staged, StoreResult};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// In-memory transactional store. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemHostStore {
    inner: Arc<Mutex<Staged>>,
    commits: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MemHostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock().unwrap();
        f.debug_struct("MemHostStore")
            .field("committed", &guard.committed.len())
            .field("pending", &guard.pending.len())
            .finish()
    }
}

impl MemHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a process restart: the returned handle sees only data that
    /// was committed through this one. Staged writes are lost.
    pub fn reopen(&self) -> Self {
        let committed = self.inner.lock().unwrap().committed.clone();
        Self {
            inner: Arc::new(Mutex::new(Staged::from_committed(committed))),
            commits: Arc::new(Mutex::new(0)),
        }
    }

    /// Copy of the committed contents.
    pub fn committed(&self) -> BTreeMap<String, String> {
        self.inner.lock().unwrap().committed.clone()
    }

    /// Number of successful commits through this handle and its clones.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap()
    }
}

impl KvStore for MemHostStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().unwrap().get(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.lock().unwrap().set(key, value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.lock().unwrap().delete(key);
        Ok(())
    }
}

impl HostStorage for MemHostStore {
    fn commit(&self) -> StoreResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let merged = guard.merged();
        guard.install(merged);
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        self.inner.lock().unwrap().pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_writes_do_not_survive_reopen() {
        let store = MemHostStore::new();
        store.set("host.height", "3").unwrap();
        store.commit().unwrap();
        store.set("host.height", "4").unwrap();
        assert_eq!(store.get("host.height").unwrap().as_deref(), Some("4"));

        let reopened = store.reopen();
        assert_eq!(reopened.get("host.height").unwrap().as_deref(), Some("3"));
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn abort_discards_pending_changes() {
        let store = MemHostStore::new();
        store.set("a", "1").unwrap();
        store.commit().unwrap();
        store.delete("a").unwrap();
        store.set("b", "2").unwrap();
        store.abort().unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(!store.has("b").unwrap());
    }

    #[test]
    fn clones_share_state() {
        let store = MemHostStore::new();
        let other = store.clone();
        other.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
