//! The persisted outbox of writes made while offline.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use fiscaliza_core::{Collection, Fields};
use fiscaliza_storage::TableBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Table holding queue entries, keyed by zero-padded sequence number.
pub const QUEUE_TABLE: &str = "sync_queue";

/// A queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Record creation.
    Create,
    /// Field update.
    Update,
    /// Record deletion.
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Create => write!(f, "create"),
            SyncOperation::Update => write!(f, "update"),
            SyncOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Replay status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for replay.
    Pending,
    /// Sent to the remote service, outcome not recorded yet.
    InFlight,
    /// Rejected by the remote service; halts its collection.
    Failed,
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Entry id: the zero-padded sequence number.
    pub id: String,
    /// Enqueue order.
    pub seq: u64,
    /// The mutation.
    pub operation: SyncOperation,
    /// Target collection.
    pub collection: Collection,
    /// Target record id as known locally.
    pub local_id: String,
    /// Fields sent with the mutation.
    pub payload: Fields,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Replay status.
    pub status: EntryStatus,
    /// Replay attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Last remote error.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Ordered outbox persisted in [`QUEUE_TABLE`].
///
/// Sequence numbers grow monotonically across restarts: on open the queue
/// continues after the highest stored entry. Entries are removed once
/// replayed.
pub struct SyncQueue {
    backend: Arc<dyn TableBackend>,
    next_seq: AtomicU64,
}

impl SyncQueue {
    /// Opens the queue stored in `backend`.
    pub fn open(backend: Arc<dyn TableBackend>) -> SyncResult<Self> {
        let last = backend
            .scan(QUEUE_TABLE)?
            .last()
            .and_then(|(key, _)| key.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(Self {
            backend,
            next_seq: AtomicU64::new(last + 1),
        })
    }

    /// Appends a pending entry.
    pub fn enqueue(
        &self,
        operation: SyncOperation,
        collection: Collection,
        local_id: &str,
        payload: Fields,
    ) -> SyncResult<SyncQueueEntry> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = SyncQueueEntry {
            id: entry_key(seq),
            seq,
            operation,
            collection,
            local_id: local_id.to_string(),
            payload,
            enqueued_at: Utc::now(),
            status: EntryStatus::Pending,
            attempts: 0,
            last_error: None,
        };
        self.store(&entry)?;
        debug!(seq, %operation, %collection, local_id, "enqueued offline write");
        Ok(entry)
    }

    /// Returns every entry in enqueue order.
    pub fn entries(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        self.backend
            .scan(QUEUE_TABLE)?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }

    /// Returns the entries of each collection in enqueue order.
    pub fn by_collection(&self) -> SyncResult<BTreeMap<Collection, Vec<SyncQueueEntry>>> {
        let mut grouped: BTreeMap<Collection, Vec<SyncQueueEntry>> = BTreeMap::new();
        for entry in self.entries()? {
            grouped.entry(entry.collection).or_default().push(entry);
        }
        Ok(grouped)
    }

    /// Returns the number of queued entries.
    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.backend.scan(QUEUE_TABLE)?.len())
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the number of failed entries.
    pub fn failed_count(&self) -> SyncResult<usize> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .count())
    }

    /// Records that an entry is being sent.
    pub fn mark_in_flight(&self, entry: &mut SyncQueueEntry) -> SyncResult<()> {
        entry.status = EntryStatus::InFlight;
        entry.attempts += 1;
        self.store(entry)
    }

    /// Records a remote rejection.
    pub fn mark_failed(&self, entry: &mut SyncQueueEntry, message: &str) -> SyncResult<()> {
        entry.status = EntryStatus::Failed;
        entry.last_error = Some(message.to_string());
        self.store(entry)
    }

    /// Returns an entry to pending, keeping its attempt count.
    pub fn mark_pending(&self, entry: &mut SyncQueueEntry) -> SyncResult<()> {
        entry.status = EntryStatus::Pending;
        self.store(entry)
    }

    /// Removes a replayed entry.
    pub fn remove(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        self.backend.delete(QUEUE_TABLE, &entry.id)?;
        Ok(())
    }

    /// Resets every failed entry to pending. Returns how many were reset.
    pub fn reset_failed(&self) -> SyncResult<usize> {
        let mut reset = 0;
        for mut entry in self.entries()? {
            if entry.status == EntryStatus::Failed {
                entry.status = EntryStatus::Pending;
                entry.last_error = None;
                self.store(&entry)?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn store(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        self.backend
            .put(QUEUE_TABLE, &entry.id, serde_json::to_vec(entry)?)?;
        Ok(())
    }
}

fn entry_key(seq: u64) -> String {
    format!("{seq:020}")
}
