//! Backend selection by capability probing.

use crate::backend::{BackendKind, TableBackend};
use crate::error::{StorageError, StorageResult};
use crate::log::LogBackend;
use crate::memory::MemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the indexed log inside the data directory.
pub const LOG_FILE_NAME: &str = "fiscaliza.log";

/// Configuration for opening local persistence.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Directory holding the indexed log. `None` selects the memory backend.
    pub data_dir: Option<PathBuf>,

    /// Whether the indexed backend should be tried at all.
    pub prefer_indexed: bool,

    /// Whether every write is synced to disk (safer but slower).
    pub sync_on_write: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            prefer_indexed: true,
            sync_on_write: true,
        }
    }
}

impl ProbeConfig {
    /// Creates a configuration for the given data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Creates a configuration that always selects the memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            prefer_indexed: false,
            sync_on_write: false,
        }
    }

    /// Sets whether the indexed backend should be tried.
    #[must_use]
    pub const fn prefer_indexed(mut self, value: bool) -> Self {
        self.prefer_indexed = value;
        self
    }

    /// Sets whether every write is synced to disk.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Returns the log path, if a data directory is configured.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(|dir| dir.join(LOG_FILE_NAME))
    }
}

/// Opens local persistence, selecting the backend once.
///
/// The indexed log is probed first. If it cannot be opened the failure is
/// logged as [`StorageError::BackendUnavailable`] and the memory backend is
/// returned instead; this is not fatal.
pub fn open_backend(config: &ProbeConfig) -> Arc<dyn TableBackend> {
    let probed = match config.log_path() {
        Some(path) if config.prefer_indexed => Some(probe_log(&path, config.sync_on_write)),
        _ => None,
    };

    match probed {
        Some(Ok(backend)) => {
            info!(path = %backend.path().display(), kind = %BackendKind::IndexedLog, "local persistence selected");
            Arc::new(backend)
        }
        Some(Err(err)) => {
            warn!(error = %err, fallback = %BackendKind::Memory, "indexed backend unavailable, using fallback");
            Arc::new(MemoryBackend::new())
        }
        None => {
            info!(kind = %BackendKind::Memory, "local persistence selected");
            Arc::new(MemoryBackend::new())
        }
    }
}

fn probe_log(path: &Path, sync_on_write: bool) -> StorageResult<LogBackend> {
    let backend = LogBackend::open(path, sync_on_write)
        .map_err(|e| StorageError::unavailable(BackendKind::IndexedLog, e.to_string()))?;
    backend
        .flush()
        .map_err(|e| StorageError::unavailable(BackendKind::IndexedLog, e.to_string()))?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn probe_selects_indexed_log() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&ProbeConfig::new(dir.path()));
        assert_eq!(backend.kind(), BackendKind::IndexedLog);
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn probe_without_directory_uses_memory() {
        let backend = open_backend(&ProbeConfig::default());
        assert_eq!(backend.kind(), BackendKind::Memory);

        let backend = open_backend(&ProbeConfig::in_memory());
        assert_eq!(backend.kind(), BackendKind::Memory);
    }

    #[test]
    fn probe_falls_back_when_log_cannot_open() {
        let dir = tempdir().unwrap();
        // A directory where the log file should be makes the open fail.
        fs::create_dir_all(dir.path().join(LOG_FILE_NAME)).unwrap();

        let backend = open_backend(&ProbeConfig::new(dir.path()));
        assert_eq!(backend.kind(), BackendKind::Memory);
    }

    #[test]
    fn probe_config_builder() {
        let config = ProbeConfig::new("/tmp/x")
            .prefer_indexed(false)
            .sync_on_write(false);
        assert!(!config.prefer_indexed);
        assert!(!config.sync_on_write);
        assert_eq!(config.log_path().unwrap(), PathBuf::from("/tmp/x").join(LOG_FILE_NAME));
    }
}
