//! Invariant checks and the idempotent repair routine.

use crate::collection::{Collection, Filter};
use crate::engine::Ctx;
use crate::entity::{Determination, NonConformity, Unit};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::{SourceLink, UnitRecords};
use crate::numbering::{NumberingEngine, SequenceKind};
use crate::store::{patch, EntityStore, EntityStoreExt};
use crate::text::{constatacao_prefix, has_constatacao_reference};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{info, warn};

/// One invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A non-conformity whose response or finding cannot be found.
    OrphanNonConformity {
        /// Non-conformity id.
        id: String,
        /// Its stored `source_id`, if any.
        source_id: Option<String>,
    },
    /// A determination whose non-conformity cannot be found.
    OrphanDetermination {
        /// Determination id.
        id: String,
        /// Its stored `non_conformity_id`.
        non_conformity_id: String,
    },
    /// A record referencing a parent that lives in another unit.
    ForeignUnitReference {
        /// Collection of the referencing record.
        collection: Collection,
        /// Referencing record id.
        id: String,
        /// The referenced record.
        target: String,
    },
    /// A sequence whose numbers are not exactly `first..first + n`.
    NumberingGap {
        /// Unit checked, or `None` for a whole-case check.
        unit_id: Option<String>,
        /// The sequence.
        kind: SequenceKind,
        /// The number the sequence should start at.
        expected_first: u32,
        /// The stored numbers, sorted.
        numbers: Vec<u32>,
    },
    /// An answered response or a finding without a constatação number.
    MissingNumber {
        /// Collection of the record.
        collection: Collection,
        /// Record id.
        id: String,
    },
    /// A source with the wrong number of non-conformities.
    NonConformityCountMismatch {
        /// Source id.
        source_id: String,
        /// Non-conformities the source should have: 0 or 1.
        expected: usize,
        /// Non-conformities linked to it.
        found: usize,
    },
    /// A legacy non-conformity matching several sources by text.
    AmbiguousLegacyLink {
        /// Non-conformity id.
        id: String,
        /// Every matching source.
        candidates: Vec<String>,
    },
    /// A linked non-conformity whose description carries no constatação
    /// token.
    MissingBackReference {
        /// Non-conformity id.
        id: String,
        /// The source's constatação number.
        constatacao: u32,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OrphanNonConformity { id, source_id } => match source_id {
                Some(s) => write!(f, "non-conformity {id} references missing source {s}"),
                None => write!(f, "non-conformity {id} matches no source"),
            },
            Violation::OrphanDetermination {
                id,
                non_conformity_id,
            } => write!(
                f,
                "determination {id} references missing non-conformity {non_conformity_id}"
            ),
            Violation::ForeignUnitReference {
                collection,
                id,
                target,
            } => write!(f, "{collection} {id} references {target} in another unit"),
            Violation::NumberingGap {
                unit_id,
                kind,
                expected_first,
                numbers,
            } => {
                let scope = unit_id.as_deref().unwrap_or("case");
                write!(
                    f,
                    "{kind} sequence of {scope} is {numbers:?}, expected to run from {expected_first}"
                )
            }
            Violation::MissingNumber { collection, id } => {
                write!(f, "{collection} {id} has no constatação number")
            }
            Violation::NonConformityCountMismatch {
                source_id,
                expected,
                found,
            } => write!(
                f,
                "source {source_id} has {found} non-conformities, expected {expected}"
            ),
            Violation::AmbiguousLegacyLink { id, candidates } => write!(
                f,
                "non-conformity {id} matches several sources by text: {candidates:?}"
            ),
            Violation::MissingBackReference { id, constatacao } => write!(
                f,
                "non-conformity {id} does not mention {}",
                SequenceKind::Constatacao.format(*constatacao)
            ),
        }
    }
}

/// Violations found in one unit or case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// The unit or case checked.
    pub scope: String,
    /// Every violation found.
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns true if no invariant is violated.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Converts a report with violations into [`CoreError::Integrity`].
    pub fn into_result(self) -> CoreResult<()> {
        if self.is_clean() {
            return Ok(());
        }
        let summary: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        Err(CoreError::integrity(format!(
            "{}: {}",
            self.scope,
            summary.join("; ")
        )))
    }
}

/// Changes made by [`ConsistencyValidator::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Violations found before repairing.
    pub before: ValidationReport,
    /// Non-conformities given a constatação back-reference.
    pub prefixed: Vec<String>,
    /// Deleted determinations.
    pub deleted_determinations: Vec<String>,
    /// Deleted non-conformities.
    pub deleted_non_conformities: Vec<String>,
    /// Violations left for a person to resolve.
    pub flagged: Vec<Violation>,
}

impl RepairReport {
    /// Returns true if nothing was written.
    pub fn is_noop(&self) -> bool {
        self.prefixed.is_empty()
            && self.deleted_determinations.is_empty()
            && self.deleted_non_conformities.is_empty()
    }
}

/// Read-only invariant checks and best-effort repair.
pub struct ConsistencyValidator<'a, S: ?Sized> {
    ctx: Ctx<'a, S>,
}

impl<'a, S: EntityStore + ?Sized> ConsistencyValidator<'a, S> {
    pub(crate) fn new(ctx: Ctx<'a, S>) -> Self {
        Self { ctx }
    }

    fn numbering(&self) -> NumberingEngine<'a, S> {
        NumberingEngine::new(self.ctx)
    }

    /// Checks one unit.
    ///
    /// Number sequences are checked against the counts of the units created
    /// before it: with `k` numbers assigned earlier, the unit's numbers must
    /// run exactly `k + 1..=k + n`.
    pub fn validate(&self, unit_id: &str) -> CoreResult<ValidationReport> {
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        let numbering = self.numbering();
        let units = numbering.case_units(&unit.case_id)?;
        let mut offsets = [0usize; 4];
        for prior in units.iter().take_while(|u| u.id != unit.id) {
            for (slot, kind) in offsets.iter_mut().zip(SequenceKind::ALL) {
                *slot += numbering.assigned_in_unit(&prior.id, kind)?;
            }
        }

        let records = UnitRecords::load(self.ctx, unit)?;
        let mut violations = self.check_links(&records)?;
        for (offset, kind) in offsets.into_iter().zip(SequenceKind::ALL) {
            let numbers = unit_numbers(&records, kind);
            let expected_first = u32::try_from(offset + 1).unwrap_or(u32::MAX);
            if !is_run_from(&numbers, expected_first) {
                violations.push(Violation::NumberingGap {
                    unit_id: Some(records.unit.id.clone()),
                    kind,
                    expected_first,
                    numbers,
                });
            }
        }

        Ok(ValidationReport {
            scope: format!("unit {unit_id}"),
            violations,
        })
    }

    /// Checks every unit of a case, and each sequence across the case.
    pub fn validate_case(&self, case_id: &str) -> CoreResult<ValidationReport> {
        self.numbering().require_case(case_id)?;
        let mut violations = Vec::new();
        let mut case_numbers: HashMap<SequenceKind, Vec<u32>> = HashMap::new();

        for unit in self.numbering().case_units(case_id)? {
            let records = UnitRecords::load(self.ctx, unit)?;
            violations.extend(self.check_links(&records)?);
            for kind in SequenceKind::ALL {
                case_numbers
                    .entry(kind)
                    .or_default()
                    .extend(unit_numbers(&records, kind));
            }
        }

        for kind in SequenceKind::ALL {
            let mut numbers = case_numbers.remove(&kind).unwrap_or_default();
            numbers.sort_unstable();
            if !is_run_from(&numbers, 1) {
                violations.push(Violation::NumberingGap {
                    unit_id: None,
                    kind,
                    expected_first: 1,
                    numbers,
                });
            }
        }

        Ok(ValidationReport {
            scope: format!("case {case_id}"),
            violations,
        })
    }

    /// Link and count checks for one unit.
    fn check_links(&self, records: &UnitRecords) -> CoreResult<Vec<Violation>> {
        let mut violations = Vec::new();
        let links = records.resolve_links(self.ctx.config.legacy_prefix_len);

        for nc in &records.non_conformities {
            match &links[&nc.id] {
                SourceLink::Unresolved { source_id } => {
                    violations.push(self.classify_missing_source(nc, source_id.as_deref())?);
                }
                SourceLink::Ambiguous { candidates } => {
                    violations.push(Violation::AmbiguousLegacyLink {
                        id: nc.id.clone(),
                        candidates: candidates.clone(),
                    });
                }
                link => {
                    let number = link
                        .source_id()
                        .and_then(|id| records.source(id))
                        .and_then(|s| s.number());
                    if let Some(constatacao) = number {
                        if !has_constatacao_reference(&nc.description) {
                            violations.push(Violation::MissingBackReference {
                                id: nc.id.clone(),
                                constatacao,
                            });
                        }
                    }
                }
            }
        }

        let nc_ids: HashSet<&str> = records
            .non_conformities
            .iter()
            .map(|nc| nc.id.as_str())
            .collect();
        for d in &records.determinations {
            if !nc_ids.contains(d.non_conformity_id.as_str()) {
                violations.push(self.classify_missing_nc(d)?);
            }
        }

        for source in records.sources() {
            if source.carries_number() && source.number().is_none() {
                violations.push(Violation::MissingNumber {
                    collection: source.collection(),
                    id: source.id().to_string(),
                });
            }
            if !records.ambiguous_for(&links, source.id()).is_empty() {
                continue;
            }
            let expected = usize::from(source.requires_non_conformity());
            let found = records.linked_to(&links, source.id()).len();
            if found != expected {
                violations.push(Violation::NonConformityCountMismatch {
                    source_id: source.id().to_string(),
                    expected,
                    found,
                });
            }
        }
        Ok(violations)
    }

    fn classify_missing_source(
        &self,
        nc: &NonConformity,
        source_id: Option<&str>,
    ) -> CoreResult<Violation> {
        if let (Some(id), Some(kind)) = (source_id, nc.source_kind) {
            if let Some(target) = self.find_foreign(kind.collection(), id, &nc.unit_id)? {
                return Ok(Violation::ForeignUnitReference {
                    collection: Collection::NonConformity,
                    id: nc.id.clone(),
                    target,
                });
            }
        }
        Ok(Violation::OrphanNonConformity {
            id: nc.id.clone(),
            source_id: source_id.map(str::to_string),
        })
    }

    fn classify_missing_nc(&self, d: &Determination) -> CoreResult<Violation> {
        match self.find_foreign(Collection::NonConformity, &d.non_conformity_id, &d.unit_id)? {
            Some(target) => Ok(Violation::ForeignUnitReference {
                collection: Collection::Determination,
                id: d.id.clone(),
                target,
            }),
            None => Ok(Violation::OrphanDetermination {
                id: d.id.clone(),
                non_conformity_id: d.non_conformity_id.clone(),
            }),
        }
    }

    /// Returns `id` if it exists outside `unit_id`.
    fn find_foreign(&self, collection: Collection, id: &str, unit_id: &str) -> CoreResult<Option<String>> {
        match self.ctx.store.get(collection, id) {
            Ok(record) if record.str_field("unit_id") != Some(unit_id) => Ok(Some(id.to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Best-effort fix of one unit. Never reassigns numbers.
    ///
    /// 1. prefixes `Constatação C{n}: ` to linked non-conformities whose
    ///    description carries no constatação token
    /// 2. deletes determinations whose non-conformity does not exist
    /// 3. deletes non-conformities matching no source, determinations first
    ///
    /// Ambiguous legacy links and references into other units are flagged,
    /// never deleted. A second run on a repaired unit writes nothing.
    pub fn repair(&self, unit_id: &str) -> CoreResult<RepairReport> {
        let before = self.validate(unit_id)?;
        let mut report = RepairReport::default();

        for violation in &before.violations {
            if let Violation::MissingBackReference { id, constatacao } = violation {
                let nc: NonConformity = self.ctx.store.fetch(id)?;
                let description = format!("{}{}", constatacao_prefix(*constatacao), nc.description);
                self.ctx
                    .store
                    .update(Collection::NonConformity, id, patch("description", description))?;
                report.prefixed.push(id.clone());
            }
        }

        for violation in &before.violations {
            if let Violation::OrphanDetermination { id, .. } = violation {
                self.ctx.store.delete(Collection::Determination, id)?;
                report.deleted_determinations.push(id.clone());
            }
        }

        for violation in &before.violations {
            if let Violation::OrphanNonConformity { id, .. } = violation {
                let owned: Vec<Determination> =
                    self.ctx.list(&Filter::eq("non_conformity_id", id.as_str()), "number")?;
                let owned: Vec<String> = owned.into_iter().map(|d| d.id).collect();
                if !owned.is_empty() {
                    self.ctx.store.delete_many(Collection::Determination, &owned)?;
                    report.deleted_determinations.extend(owned);
                }
                self.ctx.store.delete(Collection::NonConformity, id)?;
                report.deleted_non_conformities.push(id.clone());
            }
        }

        report.flagged = before
            .violations
            .iter()
            .filter(|v| {
                !matches!(
                    v,
                    Violation::MissingBackReference { .. }
                        | Violation::OrphanDetermination { .. }
                        | Violation::OrphanNonConformity { .. }
                )
            })
            .cloned()
            .collect();
        for violation in &report.flagged {
            warn!(unit_id, %violation, "left for manual review");
        }
        info!(
            unit_id,
            prefixed = report.prefixed.len(),
            deleted_determinations = report.deleted_determinations.len(),
            deleted_non_conformities = report.deleted_non_conformities.len(),
            flagged = report.flagged.len(),
            "repair finished"
        );
        report.before = before;
        Ok(report)
    }
}

/// Numbers stored in a unit for one sequence, sorted.
fn unit_numbers(records: &UnitRecords, kind: SequenceKind) -> Vec<u32> {
    let mut numbers: Vec<u32> = match kind {
        SequenceKind::Constatacao => records
            .sources()
            .iter()
            .filter(|s| s.carries_number())
            .filter_map(|s| s.number())
            .collect(),
        SequenceKind::NaoConformidade => records.non_conformities.iter().map(|nc| nc.number).collect(),
        SequenceKind::Determinacao => records.determinations.iter().map(|d| d.number).collect(),
        SequenceKind::Recomendacao => records.recommendations.iter().map(|r| r.number).collect(),
    };
    numbers.sort_unstable();
    numbers
}

/// Returns true if sorted `numbers` are exactly `first, first + 1, ...`.
fn is_run_from(numbers: &[u32], first: u32) -> bool {
    numbers
        .iter()
        .enumerate()
        .all(|(i, n)| u32::try_from(i).ok().and_then(|i| first.checked_add(i)) == Some(*n))
}
