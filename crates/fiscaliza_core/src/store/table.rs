//! Record store over local table persistence.

use super::EntityStore;
use crate::collection::{sort_records, Collection, Fields, Filter, Record};
use crate::error::{CoreError, CoreResult};
use fiscaliza_storage::{BatchOp, TableBackend};
use std::sync::Arc;
use uuid::Uuid;

/// An [`EntityStore`] serving records from a [`TableBackend`].
///
/// Each collection is one table; rows hold the JSON-encoded field map and
/// are keyed by record id.
///
/// # Example
///
/// ```rust
/// use fiscaliza_core::{Collection, EntityStore, Filter, TableEntityStore};
/// use fiscaliza_storage::MemoryBackend;
/// use std::sync::Arc;
///
/// let store = TableEntityStore::new(Arc::new(MemoryBackend::new()));
/// let mut fields = fiscaliza_core::Fields::new();
/// fields.insert("title".into(), "Fiscalização 12/2024".into());
/// let case = store.create(Collection::Case, fields).unwrap();
/// assert_eq!(store.filter(Collection::Case, &Filter::all(), None, None).unwrap().len(), 1);
/// assert_eq!(store.get(Collection::Case, &case.id).unwrap(), case);
/// ```
#[derive(Clone)]
pub struct TableEntityStore {
    backend: Arc<dyn TableBackend>,
    id_prefix: String,
}

impl TableEntityStore {
    /// Creates a store over the given backend.
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            id_prefix: String::new(),
        }
    }

    /// Sets a prefix for minted ids.
    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<dyn TableBackend> {
        &self.backend
    }

    /// Mints a new record id.
    pub fn mint_id(&self) -> String {
        format!("{}{}", self.id_prefix, Uuid::new_v4())
    }

    /// Inserts or replaces a record under its own id.
    pub fn put_record(&self, collection: Collection, record: &Record) -> CoreResult<()> {
        self.backend
            .put(collection.as_str(), &record.id, encode_row(&record.fields)?)?;
        Ok(())
    }

    /// Reads a record, returning `None` when missing.
    pub fn find_record(&self, collection: Collection, id: &str) -> CoreResult<Option<Record>> {
        match self.backend.get(collection.as_str(), id)? {
            Some(bytes) => Ok(Some(Record::new(id, decode_row(&bytes)?))),
            None => Ok(None),
        }
    }

    /// Removes a record, returning whether it existed.
    pub fn remove_record(&self, collection: Collection, id: &str) -> CoreResult<bool> {
        Ok(self.backend.delete(collection.as_str(), id)?)
    }

    /// Moves a record from `old_id` to `record.id` in one batch.
    pub fn replace_id(&self, collection: Collection, old_id: &str, record: &Record) -> CoreResult<()> {
        let table = collection.as_str();
        self.backend.apply_batch(vec![
            BatchOp::delete(table, old_id),
            BatchOp::put(table, record.id.clone(), encode_row(&record.fields)?),
        ])?;
        Ok(())
    }

    /// Returns the records satisfying `predicate`.
    pub fn filter_by<P>(
        &self,
        collection: Collection,
        predicate: P,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let mut records = Vec::new();
        for (id, bytes) in self.backend.scan(collection.as_str())? {
            let record = Record::new(id, decode_row(&bytes)?);
            if predicate(&record) {
                records.push(record);
            }
        }
        if let Some(field) = sort {
            sort_records(&mut records, field);
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Returns the number of records in a collection.
    pub fn count(&self, collection: Collection) -> CoreResult<usize> {
        Ok(self.backend.scan(collection.as_str())?.len())
    }
}

impl EntityStore for TableEntityStore {
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        let record = Record::new(self.mint_id(), fields);
        self.put_record(collection, &record)?;
        Ok(record)
    }

    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        let mut record = self
            .find_record(collection, id)?
            .ok_or_else(|| CoreError::not_found(collection, id))?;
        record.merge(fields);
        self.put_record(collection, &record)?;
        Ok(record)
    }

    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        if self.remove_record(collection, id)? {
            Ok(())
        } else {
            Err(CoreError::not_found(collection, id))
        }
    }

    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record> {
        self.find_record(collection, id)?
            .ok_or_else(|| CoreError::not_found(collection, id))
    }

    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        self.filter_by(collection, |r| filter.matches(r), sort, limit)
    }

    fn delete_many(&self, collection: Collection, ids: &[String]) -> CoreResult<()> {
        for id in ids {
            if self.find_record(collection, id)?.is_none() {
                return Err(CoreError::not_found(collection, id.clone()));
            }
        }
        let table = collection.as_str();
        self.backend
            .apply_batch(ids.iter().map(|id| BatchOp::delete(table, id.clone())).collect())?;
        Ok(())
    }
}

fn encode_row(fields: &Fields) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(fields)?)
}

fn decode_row(bytes: &[u8]) -> CoreResult<Fields> {
    Ok(serde_json::from_slice(bytes)?)
}
