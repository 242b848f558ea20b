//! Sequence numbers derived from stored records.
//!
//! Numbers are never kept in a running counter. The next value is counted
//! from what is stored, so deletions elsewhere are reflected automatically;
//! the renumbering pass makes the stored numbers authoritative again.

use crate::collection::{Collection, Filter};
use crate::engine::Ctx;
use crate::entity::{
    Case, ChecklistResponse, Determination, InfractionNotice, ManualFinding, NonConformity,
    Recommendation, Unit,
};
use crate::error::{CoreError, CoreResult};
use crate::store::{EntityStore, EntityStoreExt};
use std::fmt;
use tracing::debug;

/// The four numbered sequences of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceKind {
    /// Constatações: `C1, C2, ...`.
    Constatacao,
    /// Não-conformidades: `NC1, NC2, ...`.
    NaoConformidade,
    /// Determinações: `D1, D2, ...`.
    Determinacao,
    /// Recomendações: `R1, R2, ...`.
    Recomendacao,
}

impl SequenceKind {
    /// Every sequence, in dependency order.
    pub const ALL: [SequenceKind; 4] = [
        SequenceKind::Constatacao,
        SequenceKind::NaoConformidade,
        SequenceKind::Determinacao,
        SequenceKind::Recomendacao,
    ];

    /// Returns the token prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            SequenceKind::Constatacao => "C",
            SequenceKind::NaoConformidade => "NC",
            SequenceKind::Determinacao => "D",
            SequenceKind::Recomendacao => "R",
        }
    }

    /// Formats a number as its token, e.g. `NC3`.
    pub fn format(&self, number: u32) -> String {
        format!("{}{}", self.prefix(), number)
    }

    /// Parses a whole token of this kind.
    pub fn parse(&self, token: &str) -> Option<u32> {
        let digits = token.strip_prefix(self.prefix())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0') {
            return None;
        }
        digits.parse().ok()
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Formats an infraction notice number: `AI nº {n:03}/{year}/DSB/AGEMS`.
pub fn format_infraction_number(number: u32, year: i32) -> String {
    format!("AI nº {number:03}/{year}/DSB/AGEMS")
}

/// Computes the next value of each sequence.
pub struct NumberingEngine<'a, S: ?Sized> {
    ctx: Ctx<'a, S>,
}

impl<'a, S: EntityStore + ?Sized> NumberingEngine<'a, S> {
    pub(crate) fn new(ctx: Ctx<'a, S>) -> Self {
        Self { ctx }
    }

    /// Returns the units of a case in creation order.
    pub fn case_units(&self, case_id: &str) -> CoreResult<Vec<Unit>> {
        self.ctx.list(&Filter::eq("case_id", case_id), "created_at")
    }

    /// Returns the next number of `kind` for a record created in `unit_id`.
    ///
    /// Counts the numbers already assigned in the units created before
    /// `unit_id` plus those within `unit_id`, and adds one.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the unit is not part of the case.
    pub fn next_number(&self, case_id: &str, unit_id: &str, kind: SequenceKind) -> CoreResult<u32> {
        let units = self.case_units(case_id)?;
        let position = units
            .iter()
            .position(|u| u.id == unit_id)
            .ok_or_else(|| CoreError::not_found(Collection::Unit, unit_id))?;

        let mut count = 0usize;
        for unit in &units[..=position] {
            count += self.assigned_in_unit(&unit.id, kind)?;
        }
        let next = u32::try_from(count + 1)
            .map_err(|_| CoreError::integrity(format!("{kind} sequence overflow")))?;
        debug!(case_id, unit_id, %kind, next, "derived next number");
        Ok(next)
    }

    /// Counts the numbers of `kind` already assigned within one unit.
    pub fn assigned_in_unit(&self, unit_id: &str, kind: SequenceKind) -> CoreResult<usize> {
        let in_unit = Filter::eq("unit_id", unit_id);
        let count = match kind {
            SequenceKind::Constatacao => {
                let responses: Vec<ChecklistResponse> = self.ctx.list(&in_unit, "created_at")?;
                let findings: Vec<ManualFinding> = self.ctx.list(&in_unit, "ordem")?;
                responses
                    .iter()
                    .filter(|r| r.answer.is_observed() && r.number.is_some())
                    .count()
                    + findings.iter().filter(|f| f.number.is_some()).count()
            }
            SequenceKind::NaoConformidade => self.ctx.list::<NonConformity>(&in_unit, "number")?.len(),
            SequenceKind::Determinacao => self.ctx.list::<Determination>(&in_unit, "number")?.len(),
            SequenceKind::Recomendacao => self.ctx.list::<Recommendation>(&in_unit, "number")?.len(),
        };
        Ok(count)
    }

    /// Returns the next infraction notice number of a calendar year.
    ///
    /// Notice numbers are shared by every case and restart at 1 each year.
    /// A deleted notice never frees its number: the next value follows the
    /// highest one issued.
    pub fn next_infraction_number(&self, year: i32) -> CoreResult<u32> {
        let notices: Vec<InfractionNotice> = self.ctx.list(&Filter::eq("year", year), "number")?;
        Ok(notices.iter().map(|n| n.number).max().unwrap_or(0) + 1)
    }

    /// Checks that a case exists.
    pub(crate) fn require_case(&self, case_id: &str) -> CoreResult<Case> {
        self.ctx.store.fetch(case_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format() {
        assert_eq!(SequenceKind::Constatacao.format(1), "C1");
        assert_eq!(SequenceKind::NaoConformidade.format(10), "NC10");
        assert_eq!(SequenceKind::Determinacao.format(3), "D3");
        assert_eq!(SequenceKind::Recomendacao.format(7), "R7");
    }

    #[test]
    fn token_parse() {
        assert_eq!(SequenceKind::NaoConformidade.parse("NC12"), Some(12));
        assert_eq!(SequenceKind::Constatacao.parse("NC12"), None);
        assert_eq!(SequenceKind::Determinacao.parse("D"), None);
        assert_eq!(SequenceKind::Determinacao.parse("D07"), None);
        assert_eq!(SequenceKind::Recomendacao.parse("R2a"), None);
    }

    #[test]
    fn infraction_number_format() {
        assert_eq!(format_infraction_number(7, 2024), "AI nº 007/2024/DSB/AGEMS");
        assert_eq!(format_infraction_number(1234, 2025), "AI nº 1234/2025/DSB/AGEMS");
    }
}
