use crate::{HostStorage, KvStore, Staged, StoreError, StoreResult, io_error};
use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

const STORE_FILE: &str = "host-store.cbor";
const STORE_TMP_FILE: &str = "host-store.cbor.tmp";

/// Filesystem-backed host store rooted at `<root>/host-store.cbor`.
///
/// The whole committed map is rewritten on every commit: written to a
/// temporary file, synced, then renamed over the previous image.
#[derive(Clone)]
pub struct FsHostStore {
    root: PathBuf,
    inner: Arc<Mutex<Staged>>,
}

impl fmt::Debug for FsHostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsHostStore")
            .field("root", &self.root)
            .finish()
    }
}

impl FsHostStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        let committed = read_image(&root.join(STORE_FILE))?;
        log::debug!(
            "opened host store at {} ({} keys)",
            root.display(),
            committed.len()
        );
        Ok(Self {
            root,
            inner: Arc::new(Mutex::new(Staged::from_committed(committed))),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    fn write_image(&self, image: &BTreeMap<String, String>) -> StoreResult<()> {
        let bytes = serde_cbor::to_vec(image)?;
        let tmp = self.root.join(STORE_TMP_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        let target = self.path();
        fs::rename(&tmp, &target).map_err(|e| io_error(&target, e))?;
        if let Ok(dir) = File::open(&self.root) {
            // Directory fsync is best effort; not every platform supports it.
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

fn read_image(path: &Path) -> StoreResult<BTreeMap<String, String>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Err(StoreError::Corrupt(format!(
            "empty store image at {}",
            path.display()
        ))),
        Ok(bytes) => Ok(serde_cbor::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(io_error(path, err)),
    }
}

impl KvStore for FsHostStore {
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

impl HostStorage for FsHostStore {
    fn commit(&self) -> StoreResult<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.pending.is_empty() {
            return Ok(());
        }
        let merged = guard.merged();
        self.write_image(&merged)?;
        guard.install(merged);
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        self.inner.lock().unwrap().pending.clear();
        Ok(())
    }
}
