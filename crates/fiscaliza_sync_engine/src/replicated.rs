//! The online/offline routing record store.

use crate::batch::delete_chunked;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::idmap::IdMap;
use crate::queue::{SyncOperation, SyncQueue};
use crate::remote::RemoteService;
use fiscaliza_core::{
    Collection, CoreError, CoreResult, EntityStore, Fields, Filter, Record, SyncStatus,
    TableEntityStore, LOCAL_ID_FIELD, SYNC_STATUS_FIELD,
};
use fiscaliza_storage::TableBackend;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An [`EntityStore`] that writes through to a remote service while it is
/// reachable and queues writes locally while it is not.
///
/// Calls go to the remote service only when it is connected and the queue
/// is empty, so queued writes always reach the service before newer ones.
/// Every remote write is mirrored into local persistence. Offline writes
/// go to the mirror, marked `pending`; created records get a
/// `local-<uuid>` id.
pub struct ReplicatedStore<R> {
    remote: R,
    local: TableEntityStore,
    queue: SyncQueue,
    ids: IdMap,
    config: SyncConfig,
}

impl<R: RemoteService> ReplicatedStore<R> {
    /// Opens a store over `remote`, keeping the mirror, queue and id
    /// mappings in `backend`.
    pub fn open(remote: R, backend: Arc<dyn TableBackend>, config: SyncConfig) -> SyncResult<Self> {
        let local = TableEntityStore::new(Arc::clone(&backend))
            .with_id_prefix(config.local_id_prefix.clone());
        let queue = SyncQueue::open(Arc::clone(&backend))?;
        let ids = IdMap::new(backend, config.local_id_prefix.clone());
        info!(
            device = %config.device_id,
            backend = %local.backend().kind(),
            queued = queue.len()?,
            "opened replicated store"
        );
        Ok(Self {
            remote,
            local,
            queue,
            ids,
            config,
        })
    }

    /// Returns the remote service.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the local mirror.
    pub fn local(&self) -> &TableEntityStore {
        &self.local
    }

    /// Returns the offline queue.
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Returns the id mappings.
    pub fn id_map(&self) -> &IdMap {
        &self.ids
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns true if calls currently go to the remote service.
    pub fn is_online(&self) -> CoreResult<bool> {
        Ok(self.remote.is_connected() && self.queue.is_empty().map_err(into_core)?)
    }

    /// Resolves an id the caller holds to the one the remote knows. Local
    /// ids without a mapping are returned as they are.
    fn remote_id(&self, id: &str) -> CoreResult<String> {
        if self.ids.is_local(id) {
            if let Some(remote) = self.ids.remote_id(id).map_err(into_core)? {
                return Ok(remote);
            }
        }
        Ok(id.to_string())
    }

    /// Rewrites mapped local ids inside a payload. Unmapped ones are kept.
    fn relink_fields(&self, fields: Fields) -> CoreResult<Fields> {
        Ok(self.ids.relink(&fields).map_err(into_core)?.unwrap_or(fields))
    }

    fn relink_filter(&self, filter: &Filter) -> CoreResult<Filter> {
        filter
            .clauses()
            .iter()
            .try_fold(Filter::all(), |out, (field, value)| {
                let value = self.ids.relink_value(value).map_err(into_core)?;
                Ok(out.and(field.clone(), value))
            })
    }

    fn mirror(&self, collection: Collection, record: &Record) -> CoreResult<()> {
        let mut mirrored = record.clone();
        mirrored
            .fields
            .insert(SYNC_STATUS_FIELD.into(), status_value(SyncStatus::Synced)?);
        self.local.put_record(collection, &mirrored)
    }

    fn enqueue(
        &self,
        operation: SyncOperation,
        collection: Collection,
        id: &str,
        payload: Fields,
    ) -> CoreResult<()> {
        self.queue
            .enqueue(operation, collection, id, payload)
            .map_err(into_core)?;
        Ok(())
    }

    fn create_offline(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        let id = self.local.mint_id();
        let payload = self.relink_fields(strip_sync_fields(fields))?;
        let mut stored = payload.clone();
        stored.insert(SYNC_STATUS_FIELD.into(), status_value(SyncStatus::Pending)?);
        stored.insert(LOCAL_ID_FIELD.into(), Value::String(id.clone()));
        let record = Record::new(id, stored);
        self.local.put_record(collection, &record)?;
        self.ids.reserve(&record.id, collection).map_err(into_core)?;
        self.enqueue(SyncOperation::Create, collection, &record.id, payload)?;
        debug!(%collection, id = %record.id, "created record offline");
        Ok(record)
    }

    fn update_offline(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        let id = self.remote_id(id)?;
        let payload = self.relink_fields(strip_sync_fields(fields))?;
        let mut merged = payload.clone();
        merged.insert(SYNC_STATUS_FIELD.into(), status_value(SyncStatus::Pending)?);
        let record = self.local.update(collection, &id, merged)?;
        self.enqueue(SyncOperation::Update, collection, &id, payload)?;
        Ok(record)
    }

    fn delete_offline(&self, collection: Collection, id: &str) -> CoreResult<()> {
        let id = self.remote_id(id)?;
        self.local.delete(collection, &id)?;
        self.enqueue(SyncOperation::Delete, collection, &id, Fields::new())
    }
}

impl<R: RemoteService> EntityStore for ReplicatedStore<R> {
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        if self.is_online()? {
            let payload = self.relink_fields(strip_sync_fields(fields.clone()))?;
            match self.remote.create(collection, payload) {
                Ok(record) => {
                    self.mirror(collection, &record)?;
                    return Ok(record);
                }
                Err(CoreError::Offline) => {
                    warn!(%collection, "remote became unreachable; queueing create");
                }
                Err(err) => return Err(err),
            }
        }
        self.create_offline(collection, fields)
    }

    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        if self.is_online()? {
            let target = self.remote_id(id)?;
            let payload = self.relink_fields(strip_sync_fields(fields.clone()))?;
            match self.remote.update(collection, &target, payload) {
                Ok(record) => {
                    self.mirror(collection, &record)?;
                    return Ok(record);
                }
                Err(CoreError::Offline) => {
                    warn!(%collection, id, "remote became unreachable; queueing update");
                }
                Err(err) => return Err(err),
            }
        }
        self.update_offline(collection, id, fields)
    }

    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        if self.is_online()? {
            let target = self.remote_id(id)?;
            match self.remote.delete(collection, &target) {
                Ok(()) => {
                    self.local.remove_record(collection, &target)?;
                    return Ok(());
                }
                Err(CoreError::Offline) => {
                    warn!(%collection, id, "remote became unreachable; queueing delete");
                }
                Err(err) => return Err(err),
            }
        }
        self.delete_offline(collection, id)
    }

    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record> {
        if self.is_online()? {
            match self.remote.get(collection, &self.remote_id(id)?) {
                Err(CoreError::Offline) => {}
                other => return other,
            }
        }
        self.local.get(collection, &self.remote_id(id)?)
    }

    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        let filter = self.relink_filter(filter)?;
        if self.is_online()? {
            match self.remote.filter(collection, &filter, sort, limit) {
                Err(CoreError::Offline) => {}
                other => return other,
            }
        }
        self.local.filter(collection, &filter, sort, limit)
    }

    /// Online, deletes in parallel chunks of at most
    /// [`SyncConfig::delete_batch_size`] calls. Offline, deletes and
    /// queues one by one.
    fn delete_many(&self, collection: Collection, ids: &[String]) -> CoreResult<()> {
        if !self.is_online()? {
            for id in ids {
                self.delete_offline(collection, id)?;
            }
            return Ok(());
        }

        let targets = ids
            .iter()
            .map(|id| self.remote_id(id))
            .collect::<CoreResult<Vec<_>>>()?;
        let results = delete_chunked(&self.remote, collection, &targets, self.config.delete_batch_size);
        let mut first_error = None;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Some(Ok(())) => {
                    self.local.remove_record(collection, target)?;
                }
                Some(Err(err)) => {
                    warn!(%collection, id = %target, error = %err, "remote delete failed");
                    first_error.get_or_insert(err);
                }
                None => debug!(%collection, id = %target, "delete not sent after earlier failure"),
            }
        }
        info!(%collection, count = ids.len(), "deleted records remotely");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Removes the local bookkeeping fields from a payload.
pub(crate) fn strip_sync_fields(mut fields: Fields) -> Fields {
    fields.remove(SYNC_STATUS_FIELD);
    fields.remove(LOCAL_ID_FIELD);
    fields
}

pub(crate) fn status_value(status: SyncStatus) -> CoreResult<Value> {
    Ok(serde_json::to_value(status)?)
}

/// Converts queue and mapping errors for the [`EntityStore`] surface.
fn into_core(err: crate::error::SyncError) -> CoreError {
    match err {
        crate::error::SyncError::Core(core) => core,
        other => CoreError::integrity(other.to_string()),
    }
}
