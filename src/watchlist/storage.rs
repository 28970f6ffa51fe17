use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{AppError, Result};

/// Durable home of the watchlist: an ordered sequence of ids.
pub trait OrderedSetStorage: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<Vec<String>>>;
    fn save(&self, ids: &[String]) -> Result<()>;
    /// Where the sequence lives, for error messages.
    fn location(&self) -> String;
}

/// Pretty-printed JSON array on disk.
///
/// Saves go to `<path>.tmp`, are fsynced, then renamed over `<path>`, so a
/// crash leaves either the old or the new file, never a partial one. There is
/// no cross-process locking; one process owns the file.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "watchlist".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: impl Into<String>) -> AppError {
        AppError::StorageCorrupt {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl OrderedSetStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Vec<String>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| self.corrupt(e.to_string()))?;
        let items = value
            .as_array()
            .ok_or_else(|| self.corrupt("expected a JSON array of asset ids"))?;

        let mut ids = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let id = item
                .as_str()
                .ok_or_else(|| self.corrupt(format!("entry {idx} is not a string: {item}")))?;
            ids.push(id.to_string());
        }
        Ok(Some(ids))
    }

    fn save(&self, ids: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(ids)?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} watchlist entries to {}", ids.len(), self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the sequence in memory only. Used where no file should be touched.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    inner: std::sync::Mutex<Option<Vec<String>>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn with_ids(ids: &[&str]) -> Self {
        let storage = Self::default();
        *storage.inner.lock().unwrap() = Some(ids.iter().map(|s| s.to_string()).collect());
        storage
    }

    pub fn snapshot(&self) -> Option<Vec<String>> {
        self.inner.lock().unwrap().clone()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl OrderedSetStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<String>>> {
        Ok(self.inner.lock().unwrap().clone())
    }

    fn save(&self, ids: &[String]) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        *self.inner.lock().unwrap() = Some(ids.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
