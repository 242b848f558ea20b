//! Table backend trait definition.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which implementation is serving a [`TableBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Persistent indexed log ([`super::LogBackend`]).
    IndexedLog,
    /// Non-persistent fallback ([`super::MemoryBackend`]).
    Memory,
}

impl BackendKind {
    /// Returns true if this backend survives process restarts.
    pub fn is_persistent(&self) -> bool {
        matches!(self, BackendKind::IndexedLog)
    }

    /// Returns true if [`TableBackend::apply_batch`] is all-or-nothing.
    pub fn has_atomic_batches(&self) -> bool {
        matches!(self, BackendKind::IndexedLog)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::IndexedLog => write!(f, "indexed-log"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// A single mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Insert or replace a row.
    Put {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// Opaque row bytes.
        value: Vec<u8>,
    },
    /// Remove a row. Removing a missing row is not an error.
    Delete {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
}

impl BatchOp {
    /// Creates a put operation.
    pub fn put(table: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        BatchOp::Put {
            table: table.into(),
            key: key.into(),
            value,
        }
    }

    /// Creates a delete operation.
    pub fn delete(table: impl Into<String>, key: impl Into<String>) -> Self {
        BatchOp::Delete {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// A local table store.
///
/// Backends are **opaque table stores**: rows are byte values addressed by
/// `(table, key)`. Record formats belong to the layers above.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last written by `put` for that key
/// - `scan` returns rows ordered by key
/// - Backends must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`super::LogBackend`] - persistent, atomic batches
/// - [`super::MemoryBackend`] - fallback, batches applied op by op
pub trait TableBackend: Send + Sync {
    /// Reads a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Inserts or replaces a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be recorded.
    fn put(&self, table: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes a row, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be recorded.
    fn delete(&self, table: &str, key: &str) -> StorageResult<bool>;

    /// Returns every row of a table ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Applies several mutations.
    ///
    /// Only backends whose [`BackendKind::has_atomic_batches`] is true
    /// guarantee that either all or none of the operations become visible.
    ///
    /// # Errors
    ///
    /// Returns an error if any operation cannot be recorded.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()>;

    /// Lists the tables that currently hold at least one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn tables(&self) -> StorageResult<Vec<String>>;

    /// Makes all previous writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;

    /// Returns which implementation this is.
    fn kind(&self) -> BackendKind;
}
