//! Persistent indexed log backend.

use crate::backend::{BackendKind, BatchOp, TableBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

type Tables = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Frame header: payload length (4).
const HEADER_SIZE: usize = 4;
/// Frame trailer: CRC32 over header and payload (4).
const CRC_SIZE: usize = 4;

/// A persistent table backend built on an append-only log.
///
/// Every write appends one frame holding a CBOR-encoded list of
/// [`BatchOp`]s. The whole log is replayed into an in-memory index on open,
/// so reads never touch the file.
///
/// # Durability
///
/// - A frame is either fully applied on recovery or ignored, which makes
///   [`TableBackend::apply_batch`] atomic
/// - A torn frame at the tail (crash mid-append) is truncated on open
/// - A checksum failure before the tail is reported as
///   [`StorageError::Corrupted`]
///
/// # Example
///
/// ```no_run
/// use fiscaliza_storage::{LogBackend, TableBackend};
/// use std::path::Path;
///
/// let backend = LogBackend::open(Path::new("data/fiscaliza.log"), true).unwrap();
/// backend.put("units", "u1", b"row".to_vec()).unwrap();
/// ```
#[derive(Debug)]
pub struct LogBackend {
    path: PathBuf,
    sync_on_write: bool,
    inner: Mutex<LogInner>,
}

#[derive(Debug)]
struct LogInner {
    file: File,
    size: u64,
    frames: u64,
    tables: Tables,
}

impl LogBackend {
    /// Opens or creates a log at the given path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or holds a corrupted
    /// frame before its tail.
    pub fn open(path: &Path, sync_on_write: bool) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut tables = Tables::new();
        let (valid_len, frames) = replay_frames(&bytes, &mut tables)?;

        if valid_len < bytes.len() as u64 {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = bytes.len(),
                "truncating torn frame at log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), frames, tables = tables.len(), "log opened");

        Ok(Self {
            path: path.to_path_buf(),
            sync_on_write,
            inner: Mutex::new(LogInner {
                file,
                size: valid_len,
                frames,
                tables,
            }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of frames currently in the log.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.inner.lock().frames
    }

    /// Rewrites the log so it holds one frame with only the live rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted file cannot be written or swapped in.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let ops: Vec<BatchOp> = inner
            .tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .map(move |(key, value)| BatchOp::put(table.clone(), key.clone(), value.clone()))
            })
            .collect();

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = File::create(&tmp_path)?;
        let mut size = 0u64;
        let mut frames = 0u64;
        if !ops.is_empty() {
            let frame = encode_frame(&ops)?;
            tmp.write_all(&frame)?;
            size = frame.len() as u64;
            frames = 1;
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        inner.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        inner.size = size;
        inner.frames = frames;
        debug!(path = %self.path.display(), rows = ops.len(), "log compacted");
        Ok(())
    }

    fn append(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&ops)?;

        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&frame)?;
        if self.sync_on_write {
            inner.file.sync_data()?;
        }
        inner.size += frame.len() as u64;
        inner.frames += 1;
        for op in ops {
            apply_op(&mut inner.tables, op);
        }
        Ok(())
    }
}

impl TableBackend for LogBackend {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn put(&self, table: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.append(vec![BatchOp::put(table, key, value)])
    }

    fn delete(&self, table: &str, key: &str) -> StorageResult<bool> {
        let existed = self.get(table, key)?.is_some();
        if existed {
            self.append(vec![BatchOp::delete(table, key)])?;
        }
        Ok(existed)
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .inner
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        self.append(ops)
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.inner.lock().tables.keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::IndexedLog
    }
}

fn apply_op(tables: &mut Tables, op: BatchOp) {
    match op {
        BatchOp::Put { table, key, value } => {
            tables.entry(table).or_default().insert(key, value);
        }
        BatchOp::Delete { table, key } => {
            if let Some(rows) = tables.get_mut(&table) {
                rows.remove(&key);
                if rows.is_empty() {
                    tables.remove(&table);
                }
            }
        }
    }
}

fn encode_frame(ops: &[BatchOp]) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(ops, &mut payload).map_err(|e| StorageError::codec(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&frame_len(payload.len())?.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Frame payloads carry their length in a 32-bit header field.
fn frame_len(len: usize) -> StorageResult<u32> {
    u32::try_from(len)
        .map_err(|_| StorageError::codec(format!("batch of {len} bytes exceeds the frame size limit")))
}

/// Replays frames into `tables`, returning the length of the valid prefix
/// and the number of frames applied.
fn replay_frames(bytes: &[u8], tables: &mut Tables) -> StorageResult<(u64, u64)> {
    let mut offset = 0usize;
    let mut frames = 0u64;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_SIZE + CRC_SIZE {
            break;
        }
        let payload_len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let frame_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if rest.len() < frame_len {
            break;
        }

        let body = &rest[..HEADER_SIZE + payload_len];
        let stored = &rest[HEADER_SIZE + payload_len..frame_len];
        let stored_crc = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual_crc = compute_crc32(body);
        if stored_crc != actual_crc {
            if offset + frame_len == bytes.len() {
                break;
            }
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch in frame at offset {offset}: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let ops: Vec<BatchOp> = ciborium::from_reader(&body[HEADER_SIZE..])
            .map_err(|e| StorageError::codec(format!("frame at offset {offset}: {e}")))?;
        for op in ops {
            apply_op(tables, op);
        }

        offset += frame_len;
        frames += 1;
    }

    Ok((offset as u64, frames))
}

/// CRC32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
