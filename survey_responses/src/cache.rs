//! The durable key-value cache the store and the progress snapshot live in.
//!
//! In the browser this is local storage. Here it is a trait so that the
//! store can be handed an in-memory fake in tests and a directory of files
//! in the command line tools.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{prelude::*, Snafu};

#[derive(Debug, Snafu)]
pub enum CacheError {
    #[snafu(display("Cannot access cache entry at {path}"))]
    CacheIo {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Storage quota exceeded writing {key}: {needed} bytes, quota is {quota}"))]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
    #[snafu(display("Cannot serialize cache entry {key}"))]
    SerializeEntry {
        source: serde_json::Error,
        key: String,
    },
    #[snafu(display("Cache entry {key} is not valid JSON"))]
    ParseEntry {
        source: serde_json::Error,
        key: String,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;

pub trait DurableCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> CacheResult<()>;
    fn remove(&self, key: &str) -> CacheResult<()>;
}

/// Everything runs on one thread; consumers share the cache by reference count.
pub type SharedCache = Rc<dyn DurableCache>;

pub fn read_json<T: DeserializeOwned>(cache: &dyn DurableCache, key: &str) -> CacheResult<Option<T>> {
    match cache.get(key)? {
        Some(s) => {
            let v: T = serde_json::from_str(&s).context(ParseEntrySnafu { key })?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

pub fn write_json<T: Serialize>(cache: &dyn DurableCache, key: &str, value: &T) -> CacheResult<()> {
    let s = serde_json::to_string(value).context(SerializeEntrySnafu { key })?;
    cache.set(key, &s)
}

/// A cache held in memory, optionally with a size quota like the browser's.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RefCell<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }

    /// Writes fail once the total size of all entries would exceed `bytes`.
    pub fn with_quota(bytes: usize) -> MemoryCache {
        MemoryCache {
            entries: RefCell::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    pub fn shared() -> SharedCache {
        Rc::new(MemoryCache::new())
    }
}

impl DurableCache for MemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut entries = self.entries.borrow_mut();
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            ensure!(
                needed <= quota,
                QuotaExceededSnafu {
                    key,
                    needed,
                    quota
                }
            );
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// One file per key in a directory: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn open(dir: &Path) -> CacheResult<FileCache> {
        fs::create_dir_all(dir).context(CacheIoSnafu {
            path: dir.display().to_string(),
        })?;
        Ok(FileCache {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl DurableCache for FileCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let p = self.entry_path(key);
        match fs::read_to_string(&p) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::CacheIo {
                source: e,
                path: p.display().to_string(),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let p = self.entry_path(key);
        debug!("FileCache: writing {} bytes to {:?}", value.len(), p);
        fs::write(&p, value).context(CacheIoSnafu {
            path: p.display().to_string(),
        })
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        let p = self.entry_path(key);
        match fs::remove_file(&p) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(CacheError::CacheIo {
                source: e,
                path: p.display().to_string(),
            }),
            _ => Ok(()),
        }
    }
}
