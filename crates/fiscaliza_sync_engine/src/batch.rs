//! Chunked parallel remote deletes.

use crate::remote::RemoteService;
use fiscaliza_core::{Collection, CoreError, CoreResult};
use tracing::debug;

/// Deletes `ids` remotely, `chunk_size` calls at a time.
///
/// Calls within a chunk run on scoped threads; chunks run one after the
/// other. Returns one slot per id, in input order. Once a chunk reports a
/// failure other than not-found, later chunks are not sent and their slots
/// are `None`.
pub(crate) fn delete_chunked<R: RemoteService + ?Sized>(
    remote: &R,
    collection: Collection,
    ids: &[String],
    chunk_size: usize,
) -> Vec<Option<CoreResult<()>>> {
    let mut results: Vec<Option<CoreResult<()>>> = Vec::with_capacity(ids.len());
    let mut halted = false;

    for chunk in ids.chunks(chunk_size.max(1)) {
        if halted {
            results.extend(chunk.iter().map(|_| None));
            continue;
        }
        debug!(%collection, size = chunk.len(), "sending delete chunk");
        let chunk_results: Vec<CoreResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|id| scope.spawn(move || remote.delete(collection, id)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(CoreError::remote("delete worker panicked", false)))
                })
                .collect()
        });
        halted = chunk_results
            .iter()
            .any(|r| matches!(r, Err(e) if !e.is_not_found()));
        results.extend(chunk_results.into_iter().map(Some));
    }
    results
}
