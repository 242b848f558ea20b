//! The renumbering pass.

use super::CascadeCoordinator;
use crate::collection::Collection;
use crate::entity::NonConformity;
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::{SourceLink, UnitRecords};
use crate::numbering::SequenceKind;
use crate::store::{patch, EntityStore};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Which units a renumbering pass rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenumberScope {
    /// Every unit of the case.
    Case,
    /// The named unit and every unit created after it. Earlier units are
    /// only counted.
    FromUnit(String),
}

/// One number field rewritten by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberChange {
    /// Collection of the rewritten record.
    pub collection: Collection,
    /// Record id.
    pub id: String,
    /// Number before the pass.
    pub from: Option<u32>,
    /// Number after the pass.
    pub to: Option<u32>,
}

/// Outcome of a renumbering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberReport {
    /// Units whose records were walked and rewritten where needed.
    pub units_walked: usize,
    /// Earlier units only counted.
    pub units_counted: usize,
    /// Every number field written.
    pub changes: Vec<NumberChange>,
    /// Non-conformities whose legacy text link matched several sources.
    /// They are numbered after the linked ones of their unit.
    pub ambiguous: Vec<String>,
    /// Final value of each counter: C, NC, D and R.
    pub totals: [u32; 4],
}

impl RenumberReport {
    /// Returns true if the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the final count of a sequence.
    pub fn total(&self, kind: SequenceKind) -> u32 {
        self.totals[kind_index(kind)]
    }
}

fn kind_index(kind: SequenceKind) -> usize {
    match kind {
        SequenceKind::Constatacao => 0,
        SequenceKind::NaoConformidade => 1,
        SequenceKind::Determinacao => 2,
        SequenceKind::Recomendacao => 3,
    }
}

#[derive(Default)]
struct Counters([u32; 4]);

impl Counters {
    fn next(&mut self, kind: SequenceKind) -> u32 {
        let slot = &mut self.0[kind_index(kind)];
        *slot += 1;
        *slot
    }
}

struct Assignment {
    writes: Vec<NumberChange>,
    ambiguous: Vec<String>,
}

impl Assignment {
    fn check(&mut self, collection: Collection, id: &str, stored: Option<u32>, expected: Option<u32>) {
        if stored != expected {
            self.writes.push(NumberChange {
                collection,
                id: id.to_string(),
                from: stored,
                to: expected,
            });
        }
    }

    fn number_nc(
        &mut self,
        records: &UnitRecords,
        nc: &NonConformity,
        counters: &mut Counters,
        numbered_dets: &mut HashSet<String>,
    ) {
        let n = counters.next(SequenceKind::NaoConformidade);
        self.check(Collection::NonConformity, &nc.id, Some(nc.number), Some(n));
        for d in records.determinations_of(&nc.id) {
            let dn = counters.next(SequenceKind::Determinacao);
            numbered_dets.insert(d.id.clone());
            self.check(Collection::Determination, &d.id, Some(d.number), Some(dn));
        }
    }
}

/// Walks one unit, advancing `counters`, and returns the number fields that
/// differ from the stored ones.
///
/// Sources are walked in [`UnitRecords::sources`] order. Each linked
/// non-conformity follows its source and each determination follows its
/// non-conformity. Non-conformities without a trusted link come after the
/// linked ones; determinations whose non-conformity is missing come last.
/// Recommendations are walked by creation time.
fn assign(records: &UnitRecords, prefix_len: usize, counters: &mut Counters) -> Assignment {
    let links = records.resolve_links(prefix_len);
    let mut out = Assignment {
        writes: Vec::new(),
        ambiguous: Vec::new(),
    };
    let mut numbered_ncs: HashSet<String> = HashSet::new();
    let mut numbered_dets: HashSet<String> = HashSet::new();

    for source in records.sources() {
        let expected = if source.carries_number() {
            Some(counters.next(SequenceKind::Constatacao))
        } else {
            None
        };
        out.check(source.collection(), source.id(), source.number(), expected);
        for nc in records.linked_to(&links, source.id()) {
            numbered_ncs.insert(nc.id.clone());
            out.number_nc(records, nc, counters, &mut numbered_dets);
        }
    }

    for nc in &records.non_conformities {
        if numbered_ncs.contains(&nc.id) {
            continue;
        }
        if let Some(SourceLink::Ambiguous { .. }) = links.get(&nc.id) {
            out.ambiguous.push(nc.id.clone());
        }
        out.number_nc(records, nc, counters, &mut numbered_dets);
    }

    for d in &records.determinations {
        if !numbered_dets.contains(&d.id) {
            let dn = counters.next(SequenceKind::Determinacao);
            out.check(Collection::Determination, &d.id, Some(d.number), Some(dn));
        }
    }

    for r in &records.recommendations {
        let rn = counters.next(SequenceKind::Recomendacao);
        out.check(Collection::Recommendation, &r.id, Some(r.number), Some(rn));
    }

    out
}

impl<S: EntityStore + ?Sized> CascadeCoordinator<'_, S> {
    /// Rewrites the number fields of a case so that each sequence runs
    /// `1..=n` in walk order.
    ///
    /// Units are walked in creation order. Only fields whose value differs
    /// are written, so a second pass writes nothing. Descriptions are never
    /// rewritten: tokens composed into them keep their original value.
    pub fn renumber(&self, case_id: &str, scope: RenumberScope) -> CoreResult<RenumberReport> {
        let units = self.numbering().case_units(case_id)?;
        let start = match &scope {
            RenumberScope::Case => 0,
            RenumberScope::FromUnit(unit_id) => units
                .iter()
                .position(|u| &u.id == unit_id)
                .ok_or_else(|| CoreError::not_found(Collection::Unit, unit_id.clone()))?,
        };

        let prefix_len = self.ctx.config.legacy_prefix_len;
        let mut counters = Counters::default();
        let mut report = RenumberReport::default();

        for (index, unit) in units.into_iter().enumerate() {
            let records = UnitRecords::load(self.ctx, unit)?;
            let assignment = assign(&records, prefix_len, &mut counters);
            if index < start {
                report.units_counted += 1;
                continue;
            }
            report.units_walked += 1;
            for change in &assignment.writes {
                let value = change.to.map_or(Value::Null, Value::from);
                self.ctx
                    .store
                    .update(change.collection, &change.id, patch("number", value))?;
                debug!(
                    collection = %change.collection,
                    id = %change.id,
                    from = ?change.from,
                    to = ?change.to,
                    "renumbered"
                );
            }
            for id in &assignment.ambiguous {
                warn!(unit_id = %records.unit.id, nc_id = %id, "ambiguous legacy link; numbered after linked records");
            }
            report.changes.extend(assignment.writes);
            report.ambiguous.extend(assignment.ambiguous);
        }

        report.totals = counters.0;
        info!(
            case_id,
            walked = report.units_walked,
            writes = report.changes.len(),
            "renumbering pass finished"
        );
        Ok(report)
    }
}

