//! Repair command implementation.

use super::validate::print_report;
use super::{open_engine, CliResult};
use std::path::Path;

/// Runs the repair command.
///
/// With `dry_run`, only reports what the validator finds.
pub fn run(path: &Path, unit_id: &str, dry_run: bool) -> CliResult<()> {
    let engine = open_engine(path)?;
    if dry_run {
        print_report(&engine.validator().validate(unit_id)?);
        return Ok(());
    }

    let report = engine.validator().repair(unit_id)?;
    print_report(&report.before);
    println!();
    if report.is_noop() {
        println!("Nothing to repair");
    } else {
        for id in &report.prefixed {
            println!("  prefixed non-conformity {id}");
        }
        for id in &report.deleted_determinations {
            println!("  deleted determination {id}");
        }
        for id in &report.deleted_non_conformities {
            println!("  deleted non-conformity {id}");
        }
        println!(
            "Queued {} change(s) for sync",
            engine.store().queue().len()?
        );
    }

    if report.flagged.is_empty() {
        return Ok(());
    }
    println!();
    println!("Needs manual review:");
    for violation in &report.flagged {
        println!("  ! {violation}");
    }
    Err(format!("{} violation(s) left for review", report.flagged.len()).into())
}
