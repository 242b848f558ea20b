//! # Fiscaliza Storage
//!
//! Local table persistence for Fiscaliza clients.
//!
//! This crate provides the lowest-level storage abstraction used while a
//! client works disconnected from the backend. Backends are **opaque table
//! stores**: they map `(table, key)` pairs to byte values and do not interpret
//! what they store.
//!
//! ## Design Principles
//!
//! - One trait, [`TableBackend`], with interchangeable implementations
//! - The backend is chosen once at startup by [`open_backend`]; callers never
//!   branch on the backend kind afterwards
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Backends
//!
//! - [`LogBackend`] - Persistent, indexed, append-only log with atomic batches
//! - [`MemoryBackend`] - Degraded fallback: not persistent, batches are not atomic
//!
//! ## Example
//!
//! ```rust
//! use fiscaliza_storage::{MemoryBackend, TableBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.put("units", "u1", b"payload".to_vec()).unwrap();
//! assert_eq!(backend.get("units", "u1").unwrap(), Some(b"payload".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod log;
mod memory;
mod probe;

pub use backend::{BackendKind, BatchOp, TableBackend};
pub use error::{StorageError, StorageResult};
pub use log::LogBackend;
pub use memory::MemoryBackend;
pub use probe::{open_backend, ProbeConfig, LOG_FILE_NAME};
