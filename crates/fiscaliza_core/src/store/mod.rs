//! The record store contract the engine runs against.
//!
//! The engine never knows whether a store talks to the remote service or to
//! local persistence. [`TableEntityStore`] serves records from a
//! [`fiscaliza_storage::TableBackend`]; the sync engine provides the
//! online/offline routing store.

mod table;

pub use table::TableEntityStore;

use crate::collection::{Collection, Fields, Filter, Record};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::sync::Arc;

/// Uniform CRUD and query contract over named record collections.
///
/// # Invariants
///
/// - `create` assigns the id and returns the stored record
/// - `update` merges the given fields into the record, keeping the others
/// - `get` and `delete` fail with [`CoreError::NotFound`] for missing ids
/// - `filter` sorts ascending by `sort` (ties by id) and truncates to
///   `limit` without a cursor
pub trait EntityStore: Send + Sync {
    /// Creates a record and returns it with its assigned id.
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record>;

    /// Merges `fields` into an existing record.
    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record>;

    /// Deletes a record.
    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()>;

    /// Reads a record.
    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record>;

    /// Returns the records matching `filter`.
    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>>;

    /// Deletes several records of one collection.
    ///
    /// The default deletes one by one and stops at the first error; stores
    /// talking to a remote service may issue the calls in parallel batches.
    fn delete_many(&self, collection: Collection, ids: &[String]) -> CoreResult<()> {
        for id in ids {
            self.delete(collection, id)?;
        }
        Ok(())
    }
}

impl<S: EntityStore + ?Sized> EntityStore for Arc<S> {
    fn create(&self, collection: Collection, fields: Fields) -> CoreResult<Record> {
        (**self).create(collection, fields)
    }

    fn update(&self, collection: Collection, id: &str, fields: Fields) -> CoreResult<Record> {
        (**self).update(collection, id, fields)
    }

    fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        (**self).delete(collection, id)
    }

    fn get(&self, collection: Collection, id: &str) -> CoreResult<Record> {
        (**self).get(collection, id)
    }

    fn filter(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Record>> {
        (**self).filter(collection, filter, sort, limit)
    }

    fn delete_many(&self, collection: Collection, ids: &[String]) -> CoreResult<()> {
        (**self).delete_many(collection, ids)
    }
}

/// Builds a one-field patch.
pub fn patch(field: &str, value: impl Into<Value>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), value.into());
    fields
}

/// Typed helpers over any [`EntityStore`].
pub trait EntityStoreExt: EntityStore {
    /// Stores a new entity and returns it with its assigned id.
    fn insert<E: Entity>(&self, entity: &E) -> CoreResult<E> {
        let record = self.create(E::COLLECTION, entity.to_fields()?)?;
        E::from_record(&record)
    }

    /// Reads an entity.
    fn fetch<E: Entity>(&self, id: &str) -> CoreResult<E> {
        E::from_record(&self.get(E::COLLECTION, id)?)
    }

    /// Reads an entity, mapping not-found to `None`.
    fn find<E: Entity>(&self, id: &str) -> CoreResult<Option<E>> {
        match self.get(E::COLLECTION, id) {
            Ok(record) => Ok(Some(E::from_record(&record)?)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists entities matching `filter`.
    fn list<E: Entity>(
        &self,
        filter: &Filter,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<E>> {
        self.filter(E::COLLECTION, filter, sort, limit)?
            .iter()
            .map(E::from_record)
            .collect()
    }

    /// Merges `fields` into an entity and returns the result.
    fn patch_entity<E: Entity>(&self, id: &str, fields: Fields) -> CoreResult<E> {
        E::from_record(&self.update(E::COLLECTION, id, fields)?)
    }
}

impl<S: EntityStore + ?Sized> EntityStoreExt for S {}
