use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Document storage keyed by short file-like names. A successful `save` is
/// all-or-nothing: readers see either the old document or the new one.
pub trait Persistence: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, doc: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Keys starting with `prefix`, in no particular order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    fn modified(&self, key: &str) -> Option<SystemTime>;
}

/// One JSON file per key under a data directory. Writes go to `<key>.tmp`
/// and are renamed over the target.
pub struct FileStore {
    dir: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retries: 3,
            backoff: Duration::from_millis(300),
        }
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self {
            dir: cfg.data_dir.clone(),
            retries: cfg.save_retries.max(1),
            backoff: cfg.retry_backoff,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }

    fn write_once(&self, key: &str, doc: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path(key);
        let tmp = self.path(&format!("{}.tmp", key));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(doc.as_bytes())?;
        file.sync_all()?;
        drop(file);
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

impl Persistence for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key);
        let mut last_err = None;
        for attempt in 0..self.retries {
            match fs::read_to_string(&path) {
                Ok(content) => return Ok(Some(content)),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    warn!("Read {} failed (attempt {}): {}", key, attempt + 1, e);
                    last_err = Some(e);
                    backoff_sleep(self.backoff * (attempt + 1));
                }
            }
        }
        match last_err {
            Some(e) => Err(Self::io_err(key, e)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, doc: &str) -> Result<(), StoreError> {
        for attempt in 0..self.retries {
            match self.write_once(key, doc) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Write {} failed (attempt {}): {}", key, attempt + 1, e);
                    if attempt + 1 < self.retries {
                        backoff_sleep(self.backoff * (attempt + 1));
                    }
                }
            }
        }
        Err(StoreError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.retries,
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(prefix, e)),
        };
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix) && name.ends_with(".json"))
            .collect())
    }

    fn modified(&self, key: &str) -> Option<SystemTime> {
        fs::metadata(self.path(key)).and_then(|m| m.modified()).ok()
    }
}

/// Wait between retries. On a multi-threaded runtime the worker is handed
/// over to the scheduler first so other tasks keep running.
fn backoff_sleep(duration: Duration) {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| std::thread::sleep(duration))
        }
        _ => std::thread::sleep(duration),
    }
}

/// In-process store for tests and embedding. Modification times come from
/// a logical clock so ordering is deterministic.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, (String, u64)>>,
    clock: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> u64 {
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        *clock += 1;
        *clock
    }
}

impl Persistence for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(key).map(|(doc, _)| doc.clone()))
    }

    fn save(&self, key: &str, doc: &str) -> Result<(), StoreError> {
        let stamp = self.tick();
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (doc.to_string(), stamp));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    fn modified(&self, key: &str) -> Option<SystemTime> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.get(key)
            .map(|(_, stamp)| UNIX_EPOCH + Duration::from_secs(*stamp))
    }
}
