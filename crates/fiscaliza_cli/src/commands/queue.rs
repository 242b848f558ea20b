//! Queue command implementation.

use super::{open_store, CliResult};
use fiscaliza_sync_engine::{EntryStatus, IdMapping, SyncQueueEntry};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct QueueListing<'a> {
    entries: Vec<&'a SyncQueueEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mappings: Option<&'a [IdMapping]>,
}

/// Runs the queue command.
pub fn run(path: &Path, failed_only: bool, show_mappings: bool, format: &str) -> CliResult<()> {
    let store = open_store(path)?;
    let entries = store.queue().entries()?;
    let mappings = if show_mappings {
        store.id_map().all()?
    } else {
        Vec::new()
    };
    let listing = QueueListing {
        entries: entries
            .iter()
            .filter(|e| !failed_only || e.status == EntryStatus::Failed)
            .collect(),
        mappings: show_mappings.then_some(mappings.as_slice()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&listing)?),
        _ => print_text_output(&listing),
    }
    Ok(())
}

fn print_text_output(listing: &QueueListing<'_>) {
    if listing.entries.is_empty() {
        println!("Sync queue is empty");
    }
    for entry in &listing.entries {
        println!(
            "{} {:<8} {:<20} {} [{:?}, {} attempt(s)]",
            entry.id,
            entry.operation,
            entry.collection.as_str(),
            entry.local_id,
            entry.status,
            entry.attempts,
        );
        if let Some(error) = &entry.last_error {
            println!("    last error: {error}");
        }
    }

    if let Some(mappings) = listing.mappings {
        println!();
        println!("Id mappings:");
        for mapping in mappings {
            println!(
                "  {} {} -> {}",
                mapping.collection.as_str(),
                mapping.local_id,
                mapping.remote_id.as_deref().unwrap_or("(unmapped)")
            );
        }
    }
}
