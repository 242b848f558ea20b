//! CLI command implementations.

pub mod inspect;
pub mod queue;
pub mod renumber;
pub mod repair;
pub mod validate;

use fiscaliza_core::{Collection, CoreError, CoreResult, Engine, EntityStore, Fields, Filter, Record};
use fiscaliza_storage::{LogBackend, TableBackend, LOG_FILE_NAME};
use fiscaliza_sync_engine::{RemoteService, ReplicatedStore, SyncConfig};
use std::path::Path;
use std::sync::Arc;

/// Result type of every command.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// The store commands run against.
pub type LocalStore = Arc<ReplicatedStore<Detached>>;

/// A remote service that is never reachable.
///
/// Commands run against the local mirror only; writes they make are queued
/// like any other offline write and reach the server on the next replay.
pub struct Detached;

impl EntityStore for Detached {
    fn create(&self, _: Collection, _: Fields) -> CoreResult<Record> {
        Err(CoreError::Offline)
    }

    fn update(&self, _: Collection, _: &str, _: Fields) -> CoreResult<Record> {
        Err(CoreError::Offline)
    }

    fn delete(&self, _: Collection, _: &str) -> CoreResult<()> {
        Err(CoreError::Offline)
    }

    fn get(&self, _: Collection, _: &str) -> CoreResult<Record> {
        Err(CoreError::Offline)
    }

    fn filter(
        &self,
        _: Collection,
        _: &Filter,
        _: Option<&str>,
        _: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        Err(CoreError::Offline)
    }
}

impl RemoteService for Detached {
    fn is_connected(&self) -> bool {
        false
    }
}

/// Opens the indexed log in `path`.
pub fn open_backend(path: &Path) -> CliResult<Arc<dyn TableBackend>> {
    let log_path = path.join(LOG_FILE_NAME);
    if !log_path.exists() {
        return Err(format!("No Fiscaliza store found at {}", path.display()).into());
    }
    Ok(Arc::new(LogBackend::open(&log_path, true)?))
}

/// Opens the local store in `path`.
pub fn open_store(path: &Path) -> CliResult<LocalStore> {
    let backend = open_backend(path)?;
    Ok(Arc::new(ReplicatedStore::open(
        Detached,
        backend,
        SyncConfig::new("fiscaliza-cli"),
    )?))
}

/// Opens an engine over the local store in `path`.
pub fn open_engine(path: &Path) -> CliResult<Engine<LocalStore>> {
    Ok(Engine::new(open_store(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscaliza_core::EntityStoreExt;
    use fiscaliza_core::Unit;

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(dir.path()).err().unwrap();
        assert!(err.to_string().contains("No Fiscaliza store found"));
    }

    #[test]
    fn writes_are_queued() {
        let dir = tempfile::tempdir().unwrap();
        LogBackend::open(&dir.path().join(LOG_FILE_NAME), true).unwrap();

        let engine = open_engine(dir.path()).unwrap();
        let case = engine.open_case("Fiscalização 1/2025").unwrap();
        let unit = engine.add_unit(&case.id, "ETA Norte").unwrap();
        assert!(unit.id.starts_with("local-"));
        assert_eq!(engine.store().queue().len().unwrap(), 2);

        drop(engine);
        let store = open_store(dir.path()).unwrap();
        let reopened: Unit = store.fetch(&unit.id).unwrap();
        assert_eq!(reopened.name, "ETA Norte");
    }
}
