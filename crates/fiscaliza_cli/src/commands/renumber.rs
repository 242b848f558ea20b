//! Renumber command implementation.

use super::{open_engine, CliResult};
use fiscaliza_core::{RenumberScope, SequenceKind};
use std::path::Path;

/// Runs the renumber command over a whole case, or from `from_unit` on.
pub fn run(path: &Path, case_id: &str, from_unit: Option<String>) -> CliResult<()> {
    let engine = open_engine(path)?;
    let scope = match from_unit {
        Some(unit_id) => RenumberScope::FromUnit(unit_id),
        None => RenumberScope::Case,
    };
    let report = engine.cascade().renumber(case_id, scope)?;

    println!(
        "Walked {} unit(s), counted {} earlier unit(s)",
        report.units_walked, report.units_counted
    );
    for change in &report.changes {
        println!(
            "  {} {}: {} -> {}",
            change.collection,
            change.id,
            change.from.map_or_else(|| "-".to_string(), |n| n.to_string()),
            change.to.map_or_else(|| "-".to_string(), |n| n.to_string()),
        );
    }
    for id in &report.ambiguous {
        println!("  ! non-conformity {id} has an ambiguous legacy link");
    }
    let totals: Vec<String> = [
        SequenceKind::Constatacao,
        SequenceKind::NaoConformidade,
        SequenceKind::Determinacao,
        SequenceKind::Recomendacao,
    ]
    .into_iter()
    .map(|kind| format!("{}{}", kind.prefix(), report.total(kind)))
    .collect();
    println!("Totals: {}", totals.join(" "));
    if report.is_noop() {
        println!("✓ Numbering already dense");
    }
    Ok(())
}
