//! # Fiscaliza Sync Engine
//!
//! Offline operation for Fiscaliza.
//!
//! This crate provides:
//! - [`ReplicatedStore`]: an [`EntityStore`](fiscaliza_core::EntityStore)
//!   that talks to a [`RemoteService`] when it is reachable and writes to a
//!   local mirror and a persistent [`SyncQueue`] when it is not
//! - [`IdMap`]: the mapping from locally minted ids to remote ids
//! - [`SyncEngine`]: replays the queue in order once the service is back
//! - Retry with exponential backoff
//!
//! ## Architecture
//!
//! The numbering and cascade engine runs unchanged on top of a
//! [`ReplicatedStore`]. Offline writes get `local-` ids and a pending
//! `sync_status`, and every mutation is queued with its payload. Replay
//! sends the queue collection by collection, parents first, rewriting local
//! ids inside payloads to remote ids as they become known.
//!
//! ## Key Invariants
//!
//! - While anything is queued, every write stays local, so the remote
//!   service sees mutations in the order they happened
//! - Within a collection, entries are sent in enqueue order
//! - A rejected entry halts only its collection
//! - Parallel deletes run in chunks of at most [`MAX_DELETE_BATCH`]
//! - The local mirror is never rolled back

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod engine;
mod error;
mod idmap;
mod queue;
mod remote;
mod replicated;

pub use config::{RetryConfig, SyncConfig, LOCAL_ID_PREFIX, MAX_DELETE_BATCH};
pub use engine::{
    BlockedCollection, ReplayFailure, ReplayReport, SyncEngine, SyncState, SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use idmap::{IdMap, IdMapping, ID_MAPPING_TABLE};
pub use queue::{EntryStatus, SyncOperation, SyncQueue, SyncQueueEntry, QUEUE_TABLE};
pub use remote::{MemoryRemote, RemoteCall, RemoteOp, RemoteService};
pub use replicated::ReplicatedStore;
