//! Mapping of offline-minted ids to the ids the remote service assigned.

use crate::error::{SyncError, SyncResult};
use fiscaliza_core::{Collection, Fields};
use fiscaliza_storage::TableBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Table holding id mappings, keyed by local id.
pub const ID_MAPPING_TABLE: &str = "id_mapping";

/// One offline-minted id and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// Id minted while offline.
    pub local_id: String,
    /// Id assigned by the remote service, once synced.
    pub remote_id: Option<String>,
    /// Collection of the record.
    pub collection: Collection,
}

/// Persisted id mappings. Entries are never deleted.
pub struct IdMap {
    backend: Arc<dyn TableBackend>,
    local_prefix: String,
}

impl IdMap {
    /// Opens the mappings stored in `backend`. Ids starting with
    /// `local_prefix` are treated as offline-minted.
    pub fn new(backend: Arc<dyn TableBackend>, local_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            local_prefix: local_prefix.into(),
        }
    }

    /// Reads a mapping.
    pub fn get(&self, local_id: &str) -> SyncResult<Option<IdMapping>> {
        match self.backend.get(ID_MAPPING_TABLE, local_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the remote id of a local id, if synced.
    pub fn remote_id(&self, local_id: &str) -> SyncResult<Option<String>> {
        Ok(self.get(local_id)?.and_then(|m| m.remote_id))
    }

    /// Registers a local id with no remote id yet. Existing mappings are
    /// kept.
    pub fn reserve(&self, local_id: &str, collection: Collection) -> SyncResult<()> {
        if self.get(local_id)?.is_none() {
            self.store(&IdMapping {
                local_id: local_id.to_string(),
                remote_id: None,
                collection,
            })?;
        }
        Ok(())
    }

    /// Records the remote id of a local id.
    pub fn record(&self, local_id: &str, collection: Collection, remote_id: &str) -> SyncResult<()> {
        self.store(&IdMapping {
            local_id: local_id.to_string(),
            remote_id: Some(remote_id.to_string()),
            collection,
        })
    }

    /// Returns every mapping ordered by local id.
    pub fn all(&self) -> SyncResult<Vec<IdMapping>> {
        self.backend
            .scan(ID_MAPPING_TABLE)?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }

    /// Returns true if `id` was minted while offline.
    pub fn is_local(&self, id: &str) -> bool {
        id.starts_with(&self.local_prefix)
    }

    /// Resolves an id to the one the remote service knows.
    ///
    /// Remote ids pass through unchanged. Local ids without a remote id
    /// fail with [`SyncError::UnresolvedReference`].
    pub fn resolve(&self, collection: Collection, id: &str) -> SyncResult<String> {
        if !self.is_local(id) {
            return Ok(id.to_string());
        }
        self.remote_id(id)?
            .ok_or_else(|| SyncError::UnresolvedReference {
                collection,
                local_id: id.to_string(),
            })
    }

    /// Rewrites every local id inside `fields` to its remote id.
    ///
    /// Fails on the first local id without a remote id; `collection` names
    /// the entry being translated.
    pub fn translate(&self, collection: Collection, fields: &Fields) -> SyncResult<Fields> {
        let mut out = Fields::new();
        for (key, value) in fields {
            out.insert(key.clone(), self.translate_value(Some(collection), value)?);
        }
        Ok(out)
    }

    /// Rewrites the local ids inside `fields` that have a remote id,
    /// leaving unmapped ones in place. Returns `None` if nothing changed.
    pub fn relink(&self, fields: &Fields) -> SyncResult<Option<Fields>> {
        let mut out = Fields::new();
        let mut changed = false;
        for (key, value) in fields {
            let translated = self.translate_value(None, value)?;
            changed |= translated != *value;
            out.insert(key.clone(), translated);
        }
        Ok(changed.then_some(out))
    }

    /// Rewrites a single value the way [`IdMap::relink`] rewrites fields.
    pub fn relink_value(&self, value: &Value) -> SyncResult<Value> {
        self.translate_value(None, value)
    }

    /// Unmapped local ids fail when `strict` names the entry's collection
    /// and are kept otherwise.
    fn translate_value(&self, strict: Option<Collection>, value: &Value) -> SyncResult<Value> {
        match value {
            Value::String(s) if self.is_local(s) => match (self.remote_id(s)?, strict) {
                (Some(remote), _) => Ok(Value::String(remote)),
                (None, Some(collection)) => Err(SyncError::UnresolvedReference {
                    collection,
                    local_id: s.clone(),
                }),
                (None, None) => Ok(value.clone()),
            },
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.translate_value(strict, v))
                    .collect::<SyncResult<_>>()?,
            )),
            Value::Object(map) => {
                let mut out = Fields::new();
                for (key, v) in map {
                    out.insert(key.clone(), self.translate_value(strict, v)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn store(&self, mapping: &IdMapping) -> SyncResult<()> {
        self.backend
            .put(ID_MAPPING_TABLE, &mapping.local_id, serde_json::to_vec(mapping)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscaliza_core::patch;
    use fiscaliza_storage::MemoryBackend;

    fn map() -> IdMap {
        IdMap::new(Arc::new(MemoryBackend::new()), "local-")
    }

    #[test]
    fn record_and_resolve() {
        let map = map();
        map.reserve("local-a", Collection::Unit).unwrap();
        assert_eq!(map.remote_id("local-a").unwrap(), None);
        map.record("local-a", Collection::Unit, "7f3e").unwrap();
        map.reserve("local-a", Collection::Unit).unwrap();

        assert_eq!(map.resolve(Collection::Unit, "local-a").unwrap(), "7f3e");
        assert_eq!(map.resolve(Collection::Unit, "9c1d").unwrap(), "9c1d");
        assert!(matches!(
            map.resolve(Collection::Unit, "local-b"),
            Err(SyncError::UnresolvedReference { .. })
        ));
        assert_eq!(map.all().unwrap().len(), 1);
    }

    #[test]
    fn translate_rewrites_foreign_keys() {
        let map = map();
        map.record("local-nc", Collection::NonConformity, "nc-remote").unwrap();
        let mut fields = patch("non_conformity_id", "local-nc");
        fields.insert("number".into(), 3.into());
        fields.insert("description".into(), "Para sanar NC3, limpar.".into());

        let out = map.translate(Collection::Determination, &fields).unwrap();
        assert_eq!(out["non_conformity_id"], "nc-remote");
        assert_eq!(out["number"], 3);
        assert_eq!(out["description"], "Para sanar NC3, limpar.");
    }

    #[test]
    fn translate_blocks_on_unmapped_ids() {
        let map = map();
        let fields = patch("unit_id", "local-u");
        match map.translate(Collection::ManualFinding, &fields) {
            Err(SyncError::UnresolvedReference { collection, local_id }) => {
                assert_eq!(collection, Collection::ManualFinding);
                assert_eq!(local_id, "local-u");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn relink_is_lenient() {
        let map = map();
        map.record("local-u", Collection::Unit, "u-remote").unwrap();
        let mut fields = patch("unit_id", "local-u");
        fields.insert("record_id".into(), "local-x".into());
        let out = map.relink(&fields).unwrap().unwrap();
        assert_eq!(out["unit_id"], "u-remote");
        assert_eq!(out["record_id"], "local-x");
        assert!(map.relink(&patch("uri", "file:///a.jpg")).unwrap().is_none());
    }
}
