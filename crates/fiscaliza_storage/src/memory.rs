//! In-memory fallback backend.

use crate::backend::{BackendKind, BatchOp, TableBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Tables = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// An in-memory table backend.
///
/// This is the degraded backend selected when the indexed log cannot be
/// opened. It is also the natural choice for tests.
///
/// # Limitations
///
/// - Nothing survives the process
/// - [`TableBackend::apply_batch`] applies operations one at a time, so a
///   batch is not atomic with respect to concurrent readers
///
/// # Example
///
/// ```rust
/// use fiscaliza_storage::{MemoryBackend, TableBackend};
///
/// let backend = MemoryBackend::new();
/// backend.put("cases", "c1", vec![1, 2, 3]).unwrap();
/// assert!(backend.delete("cases", "c1").unwrap());
/// assert!(!backend.delete("cases", "c1").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.read().values().map(BTreeMap::len).sum()
    }
}

impl TableBackend for MemoryBackend {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn put(&self, table: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        let removed = match tables.get_mut(table) {
            Some(rows) => rows.remove(key).is_some(),
            None => false,
        };
        if tables.get(table).is_some_and(BTreeMap::is_empty) {
            tables.remove(table);
        }
        Ok(removed)
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        // Each op takes the lock separately; readers may observe a partial batch.
        for op in ops {
            match op {
                BatchOp::Put { table, key, value } => self.put(&table, &key, value)?,
                BatchOp::Delete { table, key } => {
                    self.delete(&table, &key)?;
                }
            }
        }
        Ok(())
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.row_count(), 0);
        assert!(backend.tables().unwrap().is_empty());
    }

    #[test]
    fn memory_put_and_get() {
        let backend = MemoryBackend::new();
        backend.put("units", "u1", b"one".to_vec()).unwrap();
        backend.put("units", "u1", b"uno".to_vec()).unwrap();

        assert_eq!(backend.get("units", "u1").unwrap(), Some(b"uno".to_vec()));
        assert_eq!(backend.get("units", "u2").unwrap(), None);
        assert_eq!(backend.get("other", "u1").unwrap(), None);
    }

    #[test]
    fn memory_scan_is_key_ordered() {
        let backend = MemoryBackend::new();
        backend.put("t", "b", vec![2]).unwrap();
        backend.put("t", "a", vec![1]).unwrap();
        backend.put("t", "c", vec![3]).unwrap();

        let keys: Vec<_> = backend
            .scan("t")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn memory_delete_drops_empty_tables() {
        let backend = MemoryBackend::new();
        backend.put("t", "a", vec![1]).unwrap();
        assert!(backend.delete("t", "a").unwrap());
        assert!(backend.tables().unwrap().is_empty());
        assert!(!backend.delete("missing", "a").unwrap());
    }

    #[test]
    fn memory_batch_applies_in_order() {
        let backend = MemoryBackend::new();
        backend
            .apply_batch(vec![
                BatchOp::put("t", "a", vec![1]),
                BatchOp::put("t", "b", vec![2]),
                BatchOp::delete("t", "a"),
            ])
            .unwrap();

        assert_eq!(backend.get("t", "a").unwrap(), None);
        assert_eq!(backend.get("t", "b").unwrap(), Some(vec![2]));
        assert_eq!(backend.kind(), BackendKind::Memory);
        assert!(!backend.kind().has_atomic_batches());
    }
}
