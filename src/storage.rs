// File: ./src/storage.rs
// Persistent storage for the calendar cache file.
//
// ⚠️ FORMAT COMPATIBILITY:
// The JSON layout is defined by `model::record::StorageBlob`. Readers on
// deployed panels expect exactly that shape, see the note there.
use crate::context::AppContext;
use crate::model::StorageBlob;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_FILE_NAME: &str = "calendar_cache.json";

/// Backing store for the cache's persisted state.
pub trait CacheStore: Send {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<StorageBlob>>;
    fn save(&self, blob: &StorageBlob) -> Result<()>;
}

/// File helpers shared by the store and the config writer.
pub struct LocalStorage;

impl LocalStorage {
    /// Helper to get a sidecar lock file path
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Run `f` while holding an exclusive lock on the sidecar lock file.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?;

        file.lock_exclusive()?;
        let result = f();
        FileExt::unlock(&file)?;
        result
    }

    /// Atomic write: Write to .tmp file then rename
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}

/// Cache file on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store named `file_name` inside the context's cache directory.
    pub fn from_context(ctx: &dyn AppContext, file_name: &str) -> Result<Self> {
        Ok(Self::new(ctx.get_cache_file_path(file_name)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> Result<Option<StorageBlob>> {
        if !self.path.exists() {
            return Ok(None);
        }
        LocalStorage::with_lock(&self.path, || {
            let json = fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read {:?}", self.path))?;
            let blob: StorageBlob = serde_json::from_str(&json)
                .with_context(|| format!("Malformed cache file {:?}", self.path))?;
            Ok(Some(blob))
        })
    }

    fn save(&self, blob: &StorageBlob) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        LocalStorage::with_lock(&self.path, || {
            let json = serde_json::to_string_pretty(blob)?;
            LocalStorage::atomic_write(&self.path, json)?;
            Ok(())
        })
    }
}
