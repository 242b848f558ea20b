//! The remote service the replicated store talks to.

use fiscaliza_core::{Collection, CoreError, CoreResult, EntityStore, Fields, Filter, Record, TableEntityStore};
use fiscaliza_storage::MemoryBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The backend service holding the authoritative records.
///
/// Implementations return [`CoreError::Offline`] when the service cannot be
/// reached and [`CoreError::Remote`] when it rejects a call.
pub trait RemoteService: EntityStore {
    /// Returns true if calls can currently reach the service.
    fn is_connected(&self) -> bool;
}

impl<R: RemoteService + ?Sized> RemoteService for Arc<R> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Kind of call made to a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `get` and `filter`
    Read,
}

/// One call received by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Kind of call.
    pub op: RemoteOp,
    /// Target collection.
    pub collection: Collection,
    /// Target id; for creates, the id the service minted.
    pub id: String,
}

/// An in-memory remote service for tests and demos.
///
/// Ids are minted as bare UUIDs. The service can be disconnected, told to
/// reject calls, and slowed down to observe concurrent deletes.
pub struct MemoryRemote {
    store: TableEntityStore,
    connected: AtomicBool,
    faults: Mutex<HashMap<(Collection, RemoteOp), usize>>,
    calls: Mutex<Vec<RemoteCall>>,
    delete_delay: Mutex<Duration>,
    deletes_in_flight: AtomicUsize,
    peak_deletes: AtomicUsize,
}

impl MemoryRemote {
    /// Creates a connected, empty service.
    pub fn new() -> Self {
        Self {
            store: TableEntityStore::new(Arc::new(MemoryBackend::new())),
            connected: AtomicBool::new(true),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delete_delay: Mutex::new(Duration::ZERO),
            deletes_in_flight: AtomicUsize::new(0),
            peak_deletes: AtomicUsize::new(0),
        }
    }

    /// Connects or disconnects the service.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `times` calls of `op` on `collection` fail with a
    /// retryable remote error.
    pub fn fail_next(&self, collection: Collection, op: RemoteOp, times: usize) {
        self.faults.lock().insert((collection, op), times);
    }

    /// Makes every delete sleep for `delay`.
    pub fn set_delete_delay(&self, delay: Duration) {
        *self.delete_delay.lock() = delay;
    }

    /// Returns the calls received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns how many calls of `op` were received.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    /// Returns the highest number of deletes that ran at the same time.
    pub fn peak_concurrent_deletes(&self) -> usize {
        self.peak_deletes.load(Ordering::SeqCst)
    }

    /// Returns the records of a collection, bypassing connectivity checks.
    pub fn snapshot(&self, collection: Collection) -> CoreResult<Vec<Record>> {
        self.store.filter(collection, &Filter::all(), Some("created_at"), None)
    }

    fn admit(&self, collection: Collection, op: RemoteOp) -> CoreResult<()> {
        if !self.is_connected() {
            return Err(CoreError::Offline);
        }
        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&(collection, op)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CoreError::remote(
                    format!("{collection} {op:?} rejected by remote"),
                    true,
                ));
            }
        }
        Ok(())
    }

    fn log(&self, op: RemoteOp, collection: Collection, id: &str) {
        self.calls.lock().push(RemoteCall {
            op,
            collection,
            id: id.to_string(),
        });
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryRemote {
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        self.admit(collection, RemoteOp::Create)?;
        let record = self.store.create(collection, fields)?;
        self.log(RemoteOp::Create, collection, &record.id);
        Ok(record)
    }

    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        self.admit(collection, RemoteOp::Update)?;
        self.log(RemoteOp::Update, collection, id);
        self.store.update(collection, id, fields)
    }

    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        self.admit(collection, RemoteOp::Delete)?;
        let running = self.deletes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_deletes.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delete_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.log(RemoteOp::Delete, collection, id);
        let result = self.store.delete(collection, id);
        self.deletes_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record> {
        self.admit(collection, RemoteOp::Read)?;
        self.store.get(collection, id)
    }

    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        self.admit(collection, RemoteOp::Read)?;
        self.store.filter(collection, filter, sort, limit)
    }
}

impl RemoteService for MemoryRemote {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscaliza_core::patch;

    #[test]
    fn disconnected_service_is_offline() {
        let remote = MemoryRemote::new();
        remote.set_connected(false);
        let err = remote.create(Collection::Case, Fields::new()).unwrap_err();
        assert!(matches!(err, CoreError::Offline));
        assert!(remote.calls().is_empty());
    }

    #[test]
    fn injected_faults_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next(Collection::Unit, RemoteOp::Create, 1);
        let err = remote.create(Collection::Unit, Fields::new()).unwrap_err();
        assert!(err.is_retryable());
        let unit = remote.create(Collection::Unit, patch("name", "ETA")).unwrap();
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
        assert_eq!(remote.calls()[0].id, unit.id);
        assert!(remote.create(Collection::Case, Fields::new()).is_ok());
    }

    #[test]
    fn deletes_track_peak_concurrency() {
        let remote = MemoryRemote::new();
        let a = remote.create(Collection::Photo, Fields::new()).unwrap();
        remote.delete(Collection::Photo, &a.id).unwrap();
        assert_eq!(remote.peak_concurrent_deletes(), 1);
        assert!(remote.delete(Collection::Photo, &a.id).unwrap_err().is_not_found());
    }
}
