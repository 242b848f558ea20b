//! The replay loop and its state machine.

use crate::batch::delete_chunked;
use crate::error::{SyncError, SyncResult};
use crate::queue::{SyncOperation, SyncQueueEntry};
use crate::remote::RemoteService;
use crate::replicated::{status_value, ReplicatedStore};
use fiscaliza_core::{
    Collection, CoreError, EntityStore, Filter, Record, SyncStatus, LOCAL_ID_FIELD,
    SYNC_STATUS_FIELD,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing replayed yet.
    Idle,
    /// Replaying the queue.
    Replaying,
    /// The last replay drained the queue.
    Synced,
    /// The last replay failed or left entries behind.
    Error,
    /// Waiting before another attempt.
    RetryWait,
}

impl SyncState {
    /// Returns true while a replay is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Replaying | SyncState::RetryWait)
    }

    /// Returns true if a new replay may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Counters over every replay run by an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Replays that ran to the end.
    pub cycles_completed: u64,
    /// Entries accepted by the remote service.
    pub entries_sent: u64,
    /// Create entries skipped because their id was already mapped.
    pub entries_skipped: u64,
    /// Entries rejected by the remote service.
    pub entries_failed: u64,
    /// Attempts repeated by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// When the queue was last drained.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// A queue entry the remote service rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    /// Collection of the entry; halted for the rest of the replay.
    pub collection: Collection,
    /// Queue entry id.
    pub entry_id: String,
    /// The mutation.
    pub operation: SyncOperation,
    /// The remote error.
    pub message: String,
    /// Whether replaying again may succeed.
    pub retryable: bool,
}

/// A collection waiting for a reference to be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedCollection {
    /// The waiting collection.
    pub collection: Collection,
    /// First entry left in it.
    pub entry_id: String,
    /// The local id that has no remote id yet.
    pub local_id: String,
}

/// Outcome of one replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Entries accepted by the remote service.
    pub sent: usize,
    /// Create entries skipped because their id was already mapped.
    pub skipped: usize,
    /// Entries rejected by the remote service.
    pub failures: Vec<ReplayFailure>,
    /// Collections left waiting on unmapped references.
    pub blocked: Vec<BlockedCollection>,
    /// Entries still queued afterwards.
    pub remaining: usize,
    /// Wall time of the replay.
    pub duration: Duration,
}

impl ReplayReport {
    /// Returns true if the queue was drained.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Returns the report if the queue was drained, or the first failure.
    pub fn into_result(self) -> SyncResult<Self> {
        if let Some(failure) = self.failures.first() {
            return Err(SyncError::SyncFailure {
                collection: failure.collection,
                entry_id: failure.entry_id.clone(),
                message: failure.message.clone(),
                retryable: failure.retryable,
            });
        }
        if let Some(blocked) = self.blocked.first() {
            return Err(SyncError::UnresolvedReference {
                collection: blocked.collection,
                local_id: blocked.local_id.clone(),
            });
        }
        Ok(self)
    }
}

/// How processing one collection ended.
enum Lane {
    Drained,
    Halted,
    Blocked(BlockedCollection),
}

/// Why one entry was not consumed.
enum EntryError {
    /// A reference has no remote id yet.
    Blocked(String),
    /// The remote service rejected the call.
    Remote(CoreError),
    /// Local bookkeeping failed; aborts the replay.
    Local(SyncError),
}

impl From<SyncError> for EntryError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::UnresolvedReference { local_id, .. } => EntryError::Blocked(local_id),
            other => EntryError::Local(other),
        }
    }
}

impl From<CoreError> for EntryError {
    fn from(err: CoreError) -> Self {
        EntryError::Local(SyncError::Core(err))
    }
}

/// Replays the offline queue of a [`ReplicatedStore`].
///
/// # Ordering
///
/// Entries of one collection are sent strictly in enqueue order. A
/// rejected entry is marked failed and halts its collection for the rest
/// of the replay; other collections continue. Collections are visited
/// parents first and revisited while any made progress, so a payload
/// referencing a record created offline in another collection waits until
/// that record is mapped.
///
/// Local state is never rolled back: failed entries stay queued and are
/// sent again by the next replay.
pub struct SyncEngine<R> {
    store: Arc<ReplicatedStore<R>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<R: RemoteService> SyncEngine<R> {
    /// Creates an engine replaying `store`'s queue.
    pub fn new(store: Arc<ReplicatedStore<R>>) -> Self {
        Self {
            store,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the replicated store.
    pub fn store(&self) -> &Arc<ReplicatedStore<R>> {
        &self.store
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels a running replay before its next entry.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn handle_error(&self, err: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(err.to_string());
    }

    /// Sends every queued entry to the remote service.
    ///
    /// Entry-level rejections are reported in the [`ReplayReport`], not as
    /// errors.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotConnected`] if the service is unreachable, before
    ///   or during the replay
    /// - [`SyncError::Cancelled`] if [`SyncEngine::cancel`] was called
    /// - [`SyncError::Core`] if local persistence fails
    pub fn replay(&self) -> SyncResult<ReplayReport> {
        self.cancelled.store(false, Ordering::SeqCst);
        if !self.store.remote().is_connected() {
            let err = SyncError::NotConnected;
            self.handle_error(&err);
            return Err(err);
        }

        self.set_state(SyncState::Replaying);
        let start = Instant::now();
        match self.replay_queue() {
            Ok(mut report) => {
                report.duration = start.elapsed();
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.entries_sent += report.sent as u64;
                stats.entries_skipped += report.skipped as u64;
                stats.entries_failed += report.failures.len() as u64;
                if report.is_complete() {
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                    drop(stats);
                    self.set_state(SyncState::Synced);
                } else {
                    stats.last_error = report.failures.first().map(|f| f.message.clone());
                    drop(stats);
                    self.set_state(SyncState::Error);
                }
                info!(
                    device = %self.store.config().device_id,
                    sent = report.sent,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    blocked = report.blocked.len(),
                    remaining = report.remaining,
                    "replay finished"
                );
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "replay aborted");
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    /// Resets failed entries to pending and replays.
    pub fn retry_failed(&self) -> SyncResult<ReplayReport> {
        let reset = self.store.queue().reset_failed()?;
        info!(reset, "retrying failed entries");
        self.replay()
    }

    /// Replays until the queue drains, backing off between attempts while
    /// the failures are retryable.
    ///
    /// # Errors
    ///
    /// The last attempt's error, or the first failure of its report.
    pub fn sync_with_retry(&self) -> SyncResult<ReplayReport> {
        let retry = &self.store.config().retry;
        let attempts = retry.max_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            let last = attempt + 1 == attempts;
            match self.replay() {
                Ok(report) if report.is_complete() => return Ok(report),
                Ok(report) => {
                    let retryable = report.blocked.is_empty()
                        && report.failures.iter().all(|f| f.retryable);
                    if last || !retryable {
                        return report.into_result();
                    }
                    debug!(attempt, remaining = report.remaining, "replay incomplete; retrying");
                }
                Err(err) if err.is_retryable() && !last => {
                    debug!(attempt, error = %err, "replay failed; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(SyncError::transport_fatal("no replay attempt made"))
    }

    fn replay_queue(&self) -> SyncResult<ReplayReport> {
        let mut report = ReplayReport::default();
        let mut lanes: BTreeMap<Collection, VecDeque<SyncQueueEntry>> = self
            .store
            .queue()
            .by_collection()?
            .into_iter()
            .map(|(collection, entries)| (collection, entries.into()))
            .collect();
        let order: Vec<Collection> = Collection::ALL
            .into_iter()
            .filter(|c| lanes.contains_key(c))
            .collect();
        let mut halted: HashSet<Collection> = HashSet::new();

        loop {
            let mut progressed = false;
            let mut blocked = Vec::new();
            for collection in &order {
                if halted.contains(collection) {
                    continue;
                }
                let Some(lane) = lanes.get_mut(collection) else {
                    continue;
                };
                let before = lane.len();
                let outcome = self.drain_lane(*collection, lane, &mut report)?;
                progressed |= lane.len() < before;
                match outcome {
                    Lane::Drained => {}
                    Lane::Halted => {
                        halted.insert(*collection);
                    }
                    Lane::Blocked(waiting) => blocked.push(waiting),
                }
            }
            if blocked.is_empty() || !progressed {
                for waiting in &blocked {
                    warn!(
                        collection = %waiting.collection,
                        local_id = %waiting.local_id,
                        "entry references an unmapped id; collection left waiting"
                    );
                }
                report.blocked = blocked;
                break;
            }
        }

        self.relink_mirror()?;
        report.remaining = self.store.queue().len()?;
        Ok(report)
    }

    /// Sends the entries of one collection until it drains, halts or
    /// blocks.
    fn drain_lane(
        &self,
        collection: Collection,
        lane: &mut VecDeque<SyncQueueEntry>,
        report: &mut ReplayReport,
    ) -> SyncResult<Lane> {
        while let Some(front) = lane.front() {
            self.check_cancelled()?;
            if front.operation == SyncOperation::Delete {
                let run = lane
                    .iter()
                    .take_while(|e| e.operation == SyncOperation::Delete)
                    .count();
                let entries: Vec<SyncQueueEntry> = lane.drain(..run).collect();
                match self.replay_deletes(collection, entries, lane, report)? {
                    Lane::Drained => continue,
                    other => return Ok(other),
                }
            }

            let Some(mut entry) = lane.pop_front() else {
                break;
            };
            match self.replay_entry(&mut entry) {
                Ok(sent) => {
                    self.store.queue().remove(&entry)?;
                    if sent {
                        report.sent += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Err(EntryError::Blocked(local_id)) => {
                    let waiting = BlockedCollection {
                        collection,
                        entry_id: entry.id.clone(),
                        local_id,
                    };
                    lane.push_front(entry);
                    return Ok(Lane::Blocked(waiting));
                }
                Err(EntryError::Remote(CoreError::Offline)) => {
                    self.store.queue().mark_pending(&mut entry)?;
                    return Err(SyncError::NotConnected);
                }
                Err(EntryError::Remote(err)) => {
                    self.fail(&mut entry, &err, report)?;
                    return Ok(Lane::Halted);
                }
                Err(EntryError::Local(err)) => return Err(err),
            }
        }
        Ok(Lane::Drained)
    }

    /// Sends one create or update. Returns false for a create skipped
    /// because its id is already mapped.
    fn replay_entry(&self, entry: &mut SyncQueueEntry) -> Result<bool, EntryError> {
        let store = &self.store;
        let collection = entry.collection;
        match entry.operation {
            SyncOperation::Create => {
                if let Some(remote_id) = store.id_map().remote_id(&entry.local_id)? {
                    debug!(%collection, local_id = %entry.local_id, "create already mapped; skipping");
                    self.adopt(collection, &entry.local_id, &remote_id)?;
                    return Ok(false);
                }
                let payload = store.id_map().translate(collection, &entry.payload)?;
                store.queue().mark_in_flight(entry)?;
                let record = store
                    .remote()
                    .create(collection, payload)
                    .map_err(EntryError::Remote)?;
                store
                    .id_map()
                    .record(&entry.local_id, collection, &record.id)?;
                self.adopt(collection, &entry.local_id, &record.id)?;
                debug!(%collection, local_id = %entry.local_id, remote_id = %record.id, "replayed create");
            }
            SyncOperation::Update => {
                let target = store.id_map().resolve(collection, &entry.local_id)?;
                let payload = store.id_map().translate(collection, &entry.payload)?;
                store.queue().mark_in_flight(entry)?;
                store
                    .remote()
                    .update(collection, &target, payload)
                    .map_err(EntryError::Remote)?;
                debug!(%collection, id = %target, "replayed update");
            }
            SyncOperation::Delete => {
                let target = store.id_map().resolve(collection, &entry.local_id)?;
                store.queue().mark_in_flight(entry)?;
                match store.remote().delete(collection, &target) {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(EntryError::Remote(err)),
                }
            }
        }
        Ok(true)
    }

    /// Sends a run of consecutive deletes in parallel chunks.
    ///
    /// Deletes of records already gone remotely count as sent. Entries
    /// whose target is not mapped yet, and those after them, go back to
    /// the front of the lane.
    fn replay_deletes(
        &self,
        collection: Collection,
        mut entries: Vec<SyncQueueEntry>,
        lane: &mut VecDeque<SyncQueueEntry>,
        report: &mut ReplayReport,
    ) -> SyncResult<Lane> {
        let ids = self.store.id_map();
        let mut targets = Vec::with_capacity(entries.len());
        let mut waiting = None;
        for entry in &entries {
            match ids.resolve(collection, &entry.local_id) {
                Ok(target) => targets.push(target),
                Err(SyncError::UnresolvedReference { local_id, .. }) => {
                    waiting = Some(BlockedCollection {
                        collection,
                        entry_id: entry.id.clone(),
                        local_id,
                    });
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        let unsent = entries.split_off(targets.len());
        for entry in unsent.into_iter().rev() {
            lane.push_front(entry);
        }

        for entry in &mut entries {
            self.store.queue().mark_in_flight(entry)?;
        }
        let results = delete_chunked(
            self.store.remote(),
            collection,
            &targets,
            self.store.config().delete_batch_size,
        );

        let mut halted = false;
        let mut disconnected = false;
        for ((mut entry, target), result) in entries.into_iter().zip(&targets).zip(results) {
            match result {
                Some(Ok(())) => self.consume_delete(collection, &entry, target, report)?,
                Some(Err(err)) if err.is_not_found() => {
                    self.consume_delete(collection, &entry, target, report)?;
                }
                Some(Err(CoreError::Offline)) => {
                    disconnected = true;
                    self.store.queue().mark_pending(&mut entry)?;
                }
                Some(Err(err)) => {
                    halted = true;
                    self.fail(&mut entry, &err, report)?;
                }
                None => self.store.queue().mark_pending(&mut entry)?,
            }
        }

        if disconnected {
            return Err(SyncError::NotConnected);
        }
        if halted {
            return Ok(Lane::Halted);
        }
        Ok(match waiting {
            Some(blocked) => Lane::Blocked(blocked),
            None => Lane::Drained,
        })
    }

    fn consume_delete(
        &self,
        collection: Collection,
        entry: &SyncQueueEntry,
        target: &str,
        report: &mut ReplayReport,
    ) -> SyncResult<()> {
        self.store.queue().remove(entry)?;
        self.store.local().remove_record(collection, target)?;
        report.sent += 1;
        Ok(())
    }

    fn fail(
        &self,
        entry: &mut SyncQueueEntry,
        err: &CoreError,
        report: &mut ReplayReport,
    ) -> SyncResult<()> {
        let message = err.to_string();
        warn!(
            collection = %entry.collection,
            entry_id = %entry.id,
            operation = %entry.operation,
            error = %message,
            "remote rejected entry; halting collection"
        );
        self.store.queue().mark_failed(entry, &message)?;
        report.failures.push(ReplayFailure {
            collection: entry.collection,
            entry_id: entry.id.clone(),
            operation: entry.operation,
            message,
            retryable: err.is_retryable(),
        });
        Ok(())
    }

    /// Moves a mirrored record from its local id to its remote id.
    fn adopt(&self, collection: Collection, local_id: &str, remote_id: &str) -> SyncResult<()> {
        let local = self.store.local();
        if let Some(mut record) = local.find_record(collection, local_id)? {
            record.id = remote_id.to_string();
            local.replace_id(collection, local_id, &record)?;
        }
        Ok(())
    }

    /// Rewrites mapped local ids inside mirrored records and marks records
    /// with nothing left in the queue as synced.
    fn relink_mirror(&self) -> SyncResult<()> {
        let store = &self.store;
        let waiting: HashSet<String> = store
            .queue()
            .entries()?
            .into_iter()
            .map(|e| e.local_id)
            .collect();
        let pending = status_value(SyncStatus::Pending)?;
        let synced = status_value(SyncStatus::Synced)?;

        let mut rewritten = 0usize;
        for collection in Collection::ALL {
            for record in store.local().filter(collection, &Filter::all(), None, None)? {
                let mut fields = record.fields.clone();
                let local_id = fields.remove(LOCAL_ID_FIELD);
                let mut changed = false;
                if let Some(relinked) = store.id_map().relink(&fields)? {
                    fields = relinked;
                    changed = true;
                }
                let queued = waiting.contains(&record.id)
                    || matches!(&local_id, Some(Value::String(id)) if waiting.contains(id));
                if !queued && fields.get(SYNC_STATUS_FIELD) == Some(&pending) {
                    fields.insert(SYNC_STATUS_FIELD.into(), synced.clone());
                    changed = true;
                }
                if changed {
                    if let Some(id) = local_id {
                        fields.insert(LOCAL_ID_FIELD.into(), id);
                    }
                    store
                        .local()
                        .put_record(collection, &Record::new(record.id, fields))?;
                    rewritten += 1;
                }
            }
        }
        debug!(rewritten, "relinked local mirror");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::queue::EntryStatus;
    use crate::remote::{MemoryRemote, RemoteOp};
    use fiscaliza_core::patch;
    use fiscaliza_storage::MemoryBackend;

    fn engine(config: SyncConfig) -> SyncEngine<MemoryRemote> {
        let store =
            ReplicatedStore::open(MemoryRemote::new(), Arc::new(MemoryBackend::new()), config)
                .unwrap();
        SyncEngine::new(Arc::new(store))
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Replaying.can_start_sync());
        assert!(SyncState::RetryWait.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn replay_requires_connection() {
        let engine = engine(SyncConfig::default());
        engine.store().remote().set_connected(false);
        assert!(matches!(engine.replay(), Err(SyncError::NotConnected)));
        assert_eq!(engine.state(), SyncState::Error);
    }

    #[test]
    fn empty_queue_replays_to_synced() {
        let engine = engine(SyncConfig::default());
        let report = engine.replay().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.sent, 0);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn replay_maps_ids_and_marks_mirror_synced() {
        let engine = engine(SyncConfig::default());
        let store = engine.store();
        store.remote().set_connected(false);
        let unit = store.create(Collection::Unit, patch("name", "ETA")).unwrap();
        let photo = store
            .create(Collection::Photo, patch("unit_id", unit.id.as_str()))
            .unwrap();
        store.remote().set_connected(true);

        let report = engine.replay().unwrap();
        assert_eq!(report.sent, 2);
        assert!(report.is_complete());

        let unit_remote = store.id_map().remote_id(&unit.id).unwrap().unwrap();
        let photo_remote = store.id_map().remote_id(&photo.id).unwrap().unwrap();
        let remote_photo = store.remote().get(Collection::Photo, &photo_remote).unwrap();
        assert_eq!(remote_photo.fields["unit_id"], unit_remote.as_str());

        let mirrored = store.local().get(Collection::Photo, &photo_remote).unwrap();
        assert_eq!(mirrored.fields["unit_id"], unit_remote.as_str());
        assert_eq!(mirrored.fields[SYNC_STATUS_FIELD], "synced");
        assert_eq!(mirrored.fields[LOCAL_ID_FIELD], photo.id.as_str());
        assert!(store.local().find_record(Collection::Photo, &photo.id).unwrap().is_none());
    }

    #[test]
    fn failure_halts_only_its_collection() {
        let engine = engine(SyncConfig::default());
        let store = engine.store();
        store.remote().set_connected(false);
        store.create(Collection::Case, patch("title", "F1")).unwrap();
        store.create(Collection::Recommendation, patch("number", 1)).unwrap();
        store.create(Collection::Recommendation, patch("number", 2)).unwrap();
        store.remote().set_connected(true);
        store
            .remote()
            .fail_next(Collection::Recommendation, RemoteOp::Create, 1);

        let report = engine.replay().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].collection, Collection::Recommendation);
        assert_eq!(report.remaining, 2);
        assert_eq!(engine.state(), SyncState::Error);

        let entries = store.queue().entries().unwrap();
        assert_eq!(entries[0].status, EntryStatus::Failed);
        assert_eq!(entries[1].status, EntryStatus::Pending);
        assert_eq!(store.remote().snapshot(Collection::Recommendation).unwrap().len(), 0);

        let report = engine.retry_failed().unwrap();
        assert!(report.is_complete());
        let mut numbers: Vec<u64> = store
            .remote()
            .snapshot(Collection::Recommendation)
            .unwrap()
            .into_iter()
            .filter_map(|r| r.fields["number"].as_u64())
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn mapped_create_is_skipped() {
        let engine = engine(SyncConfig::default());
        let store = engine.store();
        store.remote().set_connected(false);
        let case = store.create(Collection::Case, patch("title", "F1")).unwrap();
        store.remote().set_connected(true);

        let remote = store.remote().create(Collection::Case, patch("title", "F1")).unwrap();
        store
            .id_map()
            .record(&case.id, Collection::Case, &remote.id)
            .unwrap();

        let report = engine.replay().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(store.remote().call_count(RemoteOp::Create), 1);
        assert!(store.local().find_record(Collection::Case, &remote.id).unwrap().is_some());
    }

    #[test]
    fn unmapped_reference_blocks_collection() {
        let engine = engine(SyncConfig::default());
        let store = engine.store();
        store.remote().set_connected(false);
        store
            .create(Collection::Photo, patch("unit_id", "local-never-created"))
            .unwrap();
        store.remote().set_connected(true);

        let report = engine.replay().unwrap();
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].local_id, "local-never-created");
        assert_eq!(report.remaining, 1);
        assert!(matches!(
            report.into_result(),
            Err(SyncError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn queued_deletes_replay_in_chunks() {
        let engine = engine(SyncConfig::default().with_delete_batch_size(5));
        let store = engine.store();
        let ids: Vec<String> = (0..12)
            .map(|i| store.create(Collection::Photo, patch("n", i)).unwrap().id)
            .collect();
        store.remote().set_connected(false);
        store.delete_many(Collection::Photo, &ids).unwrap();
        assert_eq!(store.queue().len().unwrap(), 12);
        store.remote().set_connected(true);
        store.remote().set_delete_delay(Duration::from_millis(2));

        let report = engine.replay().unwrap();
        assert_eq!(report.sent, 12);
        assert!(report.is_complete());
        assert!(store.remote().peak_concurrent_deletes() <= 5);
        assert!(store.remote().snapshot(Collection::Photo).unwrap().is_empty());
    }

    #[test]
    fn sync_with_retry_recovers_from_transient_failures() {
        let config = SyncConfig::default().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        );
        let engine = engine(config);
        let store = engine.store();
        store.remote().set_connected(false);
        store.create(Collection::Case, patch("title", "F1")).unwrap();
        store.remote().set_connected(true);
        store.remote().fail_next(Collection::Case, RemoteOp::Create, 2);

        let report = engine.sync_with_retry().unwrap();
        assert!(report.is_complete());
        assert_eq!(engine.stats().retries, 2);
        assert_eq!(engine.stats().entries_failed, 2);
        assert_eq!(engine.state(), SyncState::Synced);
    }

    #[test]
    fn sync_with_retry_gives_up() {
        let config = SyncConfig::default().with_retry(RetryConfig::no_retry());
        let engine = engine(config);
        let store = engine.store();
        store.remote().set_connected(false);
        store.create(Collection::Case, patch("title", "F1")).unwrap();
        store.remote().set_connected(true);
        store.remote().fail_next(Collection::Case, RemoteOp::Create, 1);

        let err = engine.sync_with_retry().unwrap_err();
        assert!(matches!(err, SyncError::SyncFailure { retryable: true, .. }));
        assert_eq!(store.queue().failed_count().unwrap(), 1);
    }
}
