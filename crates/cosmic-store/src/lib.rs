//! Transactional key-value storage for host metadata, with in-memory and
//! filesystem backends.

mod fs_store;
mod mem_store;

pub use fs_store::FsHostStore;
pub use mem_store::MemHostStore;

use std::collections::BTreeMap;
use std::{io, path::PathBuf};

pub type StoreResult<T> = Result<T, StoreError>;

/// Key prefix reserved for block-manager bookkeeping inside the host store.
pub const HOST_KEY_PREFIX: &str = "host.";

/// Return the key in the reserved `host.*` section of the store.
pub fn host_key(path: &str) -> String {
    format!("{HOST_KEY_PREFIX}{path}")
}

/// Plain string key-value access.
///
/// Implementations are shared handles: every method takes `&self` and the
/// backend guards its own state.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;

    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// A key-value store whose writes are staged until `commit`.
///
/// Readers through the same handle observe staged writes immediately; a
/// reopened store only observes what was committed.
pub trait HostStorage: KvStore {
    fn commit(&self) -> StoreResult<()>;

    /// Discard every staged write since the last commit.
    fn abort(&self) -> StoreResult<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CBOR serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("corrupt store image: {0}")]
    Corrupt(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}

/// Committed map plus a write-set of pending changes (`None` = delete).
#[derive(Debug, Default, Clone)]
pub(crate) struct Staged {
    pub(crate) committed: BTreeMap<String, String>,
    pub(crate) pending: BTreeMap<String, Option<String>>,
}

impl Staged {
    pub(crate) fn from_committed(committed: BTreeMap<String, String>) -> Self {
        Self {
            committed,
            pending: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        match self.pending.get(key) {
            Some(staged) => staged.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: &str) {
        self.pending.insert(key.to_string(), Some(value.to_string()));
    }

    pub(crate) fn delete(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }

    /// Fold pending writes into a copy of the committed map.
    pub(crate) fn merged(&self) -> BTreeMap<String, String> {
        let mut next = self.committed.clone();
        for (key, value) in &self.pending {
            match value {
                Some(value) => {
                    next.insert(key.clone(), value.clone());
                }
                None => {
                    next.remove(key);
                }
            }
        }
        next
    }

    pub(crate) fn install(&mut self, committed: BTreeMap<String, String>) {
        self.committed = committed;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_uses_reserved_prefix() {
        assert_eq!(host_key("height"), "host.height");
        assert_eq!(host_key("chainSends"), "host.chainSends");
    }

    #[test]
    fn staged_reads_see_pending_writes_and_deletes() {
        let mut staged = Staged::default();
        staged.committed.insert("a".into(), "1".into());
        staged.committed.insert("b".into(), "2".into());
        staged.set("a", "10");
        staged.delete("b");
        assert_eq!(staged.get("a").as_deref(), Some("10"));
        assert_eq!(staged.get("b"), None);

        let merged = staged.merged();
        assert_eq!(merged.get("a").map(String::as_str), Some("10"));
        assert!(!merged.contains_key("b"));
    }
}
