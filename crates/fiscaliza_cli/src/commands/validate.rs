//! Validate command implementation.

use super::{open_engine, CliResult};
use fiscaliza_core::ValidationReport;
use std::path::Path;

/// What to validate.
#[derive(Debug, Clone)]
pub enum Target {
    /// One unit.
    Unit(String),
    /// A whole case, numbering checked across its units.
    Case(String),
}

/// Runs the validate command.
pub fn run(path: &Path, target: &Target) -> CliResult<()> {
    let engine = open_engine(path)?;
    let validator = engine.validator();
    let report = match target {
        Target::Unit(id) => validator.validate(id)?,
        Target::Case(id) => validator.validate_case(id)?,
    };

    print_report(&report);
    if report.is_clean() {
        Ok(())
    } else {
        Err(format!("{} violation(s) found", report.violations.len()).into())
    }
}

pub(crate) fn print_report(report: &ValidationReport) {
    println!("Validating {}", report.scope);
    println!();
    if report.is_clean() {
        println!("✓ No violations");
        return;
    }
    for violation in &report.violations {
        println!("  ✗ {violation}");
    }
}
