//! Inspect command implementation.

use super::{open_store, CliResult};
use fiscaliza_core::{Collection, EntityStore, Filter, SyncStatus, SYNC_STATUS_FIELD};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Backend holding the records.
    pub backend: String,
    /// Row counts per collection.
    pub collections: Vec<CollectionStats>,
    /// Entries waiting in the sync queue.
    pub queued: usize,
    /// Queue entries the server rejected.
    pub failed: usize,
    /// Local ids with a known remote id.
    pub mapped_ids: usize,
    /// Local ids still waiting for one.
    pub unmapped_ids: usize,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Table name.
    pub name: String,
    /// Number of records.
    pub records: usize,
    /// Records written offline and not yet confirmed.
    pub pending: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let store = open_store(path)?;
    let local = store.local();
    let pending = serde_json::to_value(SyncStatus::Pending)?;

    let mut collections = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        let records = local.filter(collection, &Filter::all(), None, None)?;
        collections.push(CollectionStats {
            name: collection.as_str().to_string(),
            records: records.len(),
            pending: records
                .iter()
                .filter(|r| r.fields.get(SYNC_STATUS_FIELD) == Some(&pending))
                .count(),
        });
    }

    let mappings = store.id_map().all()?;
    let mapped_ids = mappings.iter().filter(|m| m.remote_id.is_some()).count();
    let result = InspectResult {
        path: path.display().to_string(),
        backend: local.backend().kind().to_string(),
        collections,
        queued: store.queue().len()?,
        failed: store.queue().failed_count()?,
        mapped_ids,
        unmapped_ids: mappings.len() - mapped_ids,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Fiscaliza Store Inspection");
    println!("==========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Backend: {}", result.backend);
    println!();
    println!("Collections:");
    for col in &result.collections {
        if col.pending > 0 {
            println!("  {:<22} {:>6} ({} pending)", col.name, col.records, col.pending);
        } else {
            println!("  {:<22} {:>6}", col.name, col.records);
        }
    }
    println!();
    println!("Sync:");
    println!("  Queued entries: {}", result.queued);
    println!("  Failed entries: {}", result.failed);
    println!("  Mapped ids:     {}", result.mapped_ids);
    println!("  Unmapped ids:   {}", result.unmapped_ids);
}
