//! Deleting records together with everything they own.
//!
//! Children always go before their parent: determinations, then
//! non-conformities, then responses and findings, then the unit, then the
//! case. Every cascading delete ends with a renumbering pass so the four
//! sequences stay gapless. [`CascadeCoordinator::delete_non_conformity`] is
//! the one path that does not renumber; it hands back a [`PendingRepair`].

mod renumber;

pub use renumber::{NumberChange, RenumberReport, RenumberScope};

use crate::collection::{Collection, Filter};
use crate::engine::Ctx;
use crate::entity::{Case, Determination, InfractionNotice, NonConformity, SourceRecord, Unit};
use crate::error::CoreResult;
use crate::hierarchy::UnitRecords;
use crate::numbering::NumberingEngine;
use crate::store::{EntityStore, EntityStoreExt};
use crate::validator::{ConsistencyValidator, RepairReport};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of a cascading delete.
#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
    /// Number of records deleted per collection.
    pub deleted: BTreeMap<Collection, usize>,
    /// Non-conformities left in place because their legacy text link
    /// matched the deleted record and others.
    pub ambiguous: Vec<String>,
    /// The renumbering pass that followed.
    pub renumber: Option<RenumberReport>,
}

impl CascadeReport {
    fn count(&mut self, collection: Collection, n: usize) {
        if n > 0 {
            *self.deleted.entry(collection).or_default() += n;
        }
    }

    /// Returns how many records of a collection were deleted.
    pub fn deleted_in(&self, collection: Collection) -> usize {
        self.deleted.get(&collection).copied().unwrap_or(0)
    }

    /// Returns the total number of deleted records.
    pub fn total_deleted(&self) -> usize {
        self.deleted.values().sum()
    }
}

/// A unit left unchecked by a delete that skipped renumbering.
///
/// Must be resolved with [`PendingRepair::resolve`], which validates and
/// repairs the unit.
#[must_use = "a non-conformity was deleted without renumbering; resolve the pending repair"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRepair {
    /// Unit the deleted record belonged to.
    pub unit_id: String,
    /// Its case.
    pub case_id: String,
}

impl PendingRepair {
    /// Validates and repairs the unit.
    pub fn resolve<S: EntityStore + ?Sized>(
        self,
        validator: &ConsistencyValidator<'_, S>,
    ) -> CoreResult<RepairReport> {
        validator.repair(&self.unit_id)
    }
}

/// Cascading deletes and the renumbering pass.
pub struct CascadeCoordinator<'a, S: ?Sized> {
    ctx: Ctx<'a, S>,
}

impl<'a, S: EntityStore + ?Sized> CascadeCoordinator<'a, S> {
    pub(crate) fn new(ctx: Ctx<'a, S>) -> Self {
        Self { ctx }
    }

    fn numbering(&self) -> NumberingEngine<'a, S> {
        NumberingEngine::new(self.ctx)
    }

    fn delete_ids(
        &self,
        report: &mut CascadeReport,
        collection: Collection,
        ids: Vec<String>,
    ) -> CoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.ctx.store.delete_many(collection, &ids)?;
        info!(%collection, count = ids.len(), "cascade deleted records");
        report.count(collection, ids.len());
        Ok(())
    }

    /// Deletes every record owned by a unit, children first.
    fn purge_unit(&self, unit: Unit, report: &mut CascadeReport) -> CoreResult<()> {
        let records = UnitRecords::load(self.ctx, unit)?;

        self.delete_ids(
            report,
            Collection::Determination,
            records.determinations.iter().map(|d| d.id.clone()).collect(),
        )?;
        self.delete_ids(
            report,
            Collection::Recommendation,
            records.recommendations.iter().map(|r| r.id.clone()).collect(),
        )?;
        self.delete_ids(
            report,
            Collection::NonConformity,
            records.non_conformities.iter().map(|nc| nc.id.clone()).collect(),
        )?;
        self.delete_ids(
            report,
            Collection::ChecklistResponse,
            records.responses.iter().map(|r| r.id.clone()).collect(),
        )?;
        self.delete_ids(
            report,
            Collection::ManualFinding,
            records.findings.iter().map(|f| f.id.clone()).collect(),
        )?;
        self.delete_ids(
            report,
            Collection::Photo,
            records.photos.iter().map(|p| p.id.clone()).collect(),
        )?;
        self.ctx.store.delete(Collection::Unit, &records.unit.id)?;
        report.count(Collection::Unit, 1);
        Ok(())
    }

    /// Deletes a unit and everything it owns, then renumbers every
    /// remaining unit of its case.
    pub fn delete_unit(&self, unit_id: &str) -> CoreResult<CascadeReport> {
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        let case_id = unit.case_id.clone();
        let mut report = CascadeReport::default();
        self.purge_unit(unit, &mut report)?;
        report.renumber = Some(self.renumber(&case_id, RenumberScope::Case)?);
        info!(unit_id, case_id = %case_id, deleted = report.total_deleted(), "deleted unit");
        Ok(report)
    }

    /// Deletes a case, its units and its infraction notices.
    pub fn delete_case(&self, case_id: &str) -> CoreResult<CascadeReport> {
        let case: Case = self.ctx.store.fetch(case_id)?;
        let mut report = CascadeReport::default();
        for unit in self.numbering().case_units(&case.id)? {
            self.purge_unit(unit, &mut report)?;
        }
        let notices: Vec<InfractionNotice> =
            self.ctx.list(&Filter::eq("case_id", case.id.as_str()), "issued_at")?;
        self.delete_ids(
            &mut report,
            Collection::InfractionNotice,
            notices.into_iter().map(|n| n.id).collect(),
        )?;
        self.ctx.store.delete(Collection::Case, &case.id)?;
        report.count(Collection::Case, 1);
        info!(case_id, deleted = report.total_deleted(), "deleted case");
        Ok(report)
    }

    /// Deletes a manual finding with its non-conformity, determinations and
    /// photos, then renumbers from its unit onwards.
    pub fn delete_manual_finding(&self, finding_id: &str) -> CoreResult<CascadeReport> {
        let finding = self.ctx.store.fetch(finding_id)?;
        self.delete_source(SourceRecord::Finding(finding))
    }

    /// Deletes a checklist response with its non-conformity, determinations
    /// and photos, then renumbers from its unit onwards.
    pub fn delete_checklist_response(&self, response_id: &str) -> CoreResult<CascadeReport> {
        let response = self.ctx.store.fetch(response_id)?;
        self.delete_source(SourceRecord::Response(response))
    }

    fn delete_source(&self, source: SourceRecord) -> CoreResult<CascadeReport> {
        let unit: Unit = self.ctx.store.fetch(source.unit_id())?;
        let case_id = unit.case_id.clone();
        let unit_id = unit.id.clone();
        let records = UnitRecords::load(self.ctx, unit)?;
        let links = records.resolve_links(self.ctx.config.legacy_prefix_len);
        let mut report = CascadeReport::default();

        let linked = records.linked_to(&links, source.id());
        report.ambiguous = records.ambiguous_for(&links, source.id());
        for nc_id in &report.ambiguous {
            warn!(nc_id = %nc_id, source_id = %source.id(), "legacy link is ambiguous; non-conformity kept");
        }

        let determinations = linked
            .iter()
            .flat_map(|nc| records.determinations_of(&nc.id))
            .map(|d| d.id.clone())
            .collect();
        self.delete_ids(&mut report, Collection::Determination, determinations)?;
        self.delete_ids(
            &mut report,
            Collection::NonConformity,
            linked.iter().map(|nc| nc.id.clone()).collect(),
        )?;
        self.delete_ids(
            &mut report,
            Collection::Photo,
            records
                .photos
                .iter()
                .filter(|p| p.record_id.as_deref() == Some(source.id()))
                .map(|p| p.id.clone())
                .collect(),
        )?;
        self.ctx.store.delete(source.collection(), source.id())?;
        report.count(source.collection(), 1);

        report.renumber = Some(self.renumber(&case_id, RenumberScope::FromUnit(unit_id))?);
        info!(source_id = %source.id(), deleted = report.total_deleted(), "deleted source record");
        Ok(report)
    }

    /// Deletes a non-conformity and its determinations without renumbering.
    ///
    /// This leaves a gap in the NC and D sequences and, when the source
    /// still requires a non-conformity, an invariant violation. The returned
    /// [`PendingRepair`] must be resolved.
    pub fn delete_non_conformity(&self, nc_id: &str) -> CoreResult<PendingRepair> {
        let nc: NonConformity = self.ctx.store.fetch(nc_id)?;
        let unit: Unit = self.ctx.store.fetch(&nc.unit_id)?;
        let determinations: Vec<Determination> =
            self.ctx.list(&Filter::eq("non_conformity_id", nc_id), "number")?;
        let ids: Vec<String> = determinations.into_iter().map(|d| d.id).collect();
        if !ids.is_empty() {
            self.ctx.store.delete_many(Collection::Determination, &ids)?;
        }
        self.ctx.store.delete(Collection::NonConformity, nc_id)?;
        warn!(
            nc_id,
            unit_id = %unit.id,
            determinations = ids.len(),
            "deleted non-conformity without renumbering; repair pending"
        );
        Ok(PendingRepair {
            unit_id: unit.id,
            case_id: unit.case_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::entity::{ManualFinding, Photo};
    use crate::numbering::SequenceKind;
    use crate::saga::{ManualFindingInput, RecordedFinding};
    use crate::store::TableEntityStore;
    use crate::validator::Violation;
    use fiscaliza_storage::MemoryBackend;
    use std::sync::Arc;

    type TestEngine = Engine<TableEntityStore>;

    fn engine() -> TestEngine {
        Engine::new(TableEntityStore::new(Arc::new(MemoryBackend::new())))
    }

    fn finding(engine: &TestEngine, unit_id: &str, text: &str) -> RecordedFinding {
        engine
            .sagas()
            .record_manual_finding(
                unit_id,
                ManualFindingInput::new(text)
                    .with_non_conformity("art. 5 da Resolução 12/2020")
                    .with_determination("corrigir a falha."),
            )
            .unwrap()
    }

    fn seed_unit(engine: &TestEngine, case_id: &str, name: &str, findings: usize) -> Unit {
        let unit = engine.add_unit(case_id, name).unwrap();
        for i in 0..findings {
            finding(engine, &unit.id, &format!("{name}: falha {i}"));
        }
        unit
    }

    fn findings_of(engine: &TestEngine, unit_id: &str) -> Vec<ManualFinding> {
        engine
            .store()
            .list(&Filter::eq("unit_id", unit_id), Some("ordem"), None)
            .unwrap()
    }

    fn nc_numbers(engine: &TestEngine, unit_id: &str) -> Vec<u32> {
        let ncs: Vec<NonConformity> = engine
            .store()
            .list(&Filter::eq("unit_id", unit_id), Some("number"), None)
            .unwrap();
        ncs.into_iter().map(|nc| nc.number).collect()
    }

    #[test]
    fn delete_unit_renumbers_later_units() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 10").unwrap();
        let first = seed_unit(&engine, &case.id, "ETA", 2);
        let middle = seed_unit(&engine, &case.id, "ETE", 2);
        let last = seed_unit(&engine, &case.id, "Reservatório", 2);
        assert_eq!(nc_numbers(&engine, &last.id), vec![5, 6]);

        let report = engine.cascade().delete_unit(&middle.id).unwrap();
        assert_eq!(report.deleted_in(Collection::Unit), 1);
        assert_eq!(report.deleted_in(Collection::ManualFinding), 2);
        assert_eq!(report.deleted_in(Collection::NonConformity), 2);
        assert_eq!(report.deleted_in(Collection::Determination), 2);
        assert!(engine.store().find::<Unit>(&middle.id).unwrap().is_none());

        let renumber = report.renumber.unwrap();
        assert_eq!(renumber.total(SequenceKind::Constatacao), 4);
        assert_eq!(renumber.total(SequenceKind::NaoConformidade), 4);
        assert_eq!(nc_numbers(&engine, &first.id), vec![1, 2]);
        assert_eq!(nc_numbers(&engine, &last.id), vec![3, 4]);
        let numbers: Vec<_> = findings_of(&engine, &last.id)
            .into_iter()
            .map(|f| f.number)
            .collect();
        assert_eq!(numbers, vec![Some(3), Some(4)]);

        // descriptions keep the tokens written at creation
        let ncs: Vec<NonConformity> = engine
            .store()
            .list(&Filter::eq("unit_id", last.id.as_str()), Some("number"), None)
            .unwrap();
        assert!(ncs[0].description.contains("C5"));

        assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
    }

    #[test]
    fn renumber_is_idempotent() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 11").unwrap();
        seed_unit(&engine, &case.id, "ETA", 3);
        let report = engine.cascade().renumber(&case.id, RenumberScope::Case).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.units_walked, 1);
    }

    #[test]
    fn renumber_from_unit_only_counts_earlier_units() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 12").unwrap();
        seed_unit(&engine, &case.id, "ETA", 1);
        let second = seed_unit(&engine, &case.id, "ETE", 1);
        let report = engine
            .cascade()
            .renumber(&case.id, RenumberScope::FromUnit(second.id.clone()))
            .unwrap();
        assert_eq!(report.units_counted, 1);
        assert_eq!(report.units_walked, 1);
        assert_eq!(report.total(SequenceKind::Determinacao), 2);

        let err = engine
            .cascade()
            .renumber(&case.id, RenumberScope::FromUnit("missing".into()))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_manual_finding_removes_chain_and_photos() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 13").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        finding(&engine, &unit.id, "Cloro residual abaixo do mínimo");
        let doomed = finding(&engine, &unit.id, "Tampa do reservatório aberta");
        finding(&engine, &unit.id, "Extintor vencido");
        engine
            .add_photo(&unit.id, Some(doomed.finding.id.as_str()), "file:///fotos/tampa.jpg")
            .unwrap();
        let kept = engine.add_photo(&unit.id, None, "file:///fotos/fachada.jpg").unwrap();

        let report = engine
            .cascade()
            .delete_manual_finding(&doomed.finding.id)
            .unwrap();
        assert_eq!(report.deleted_in(Collection::ManualFinding), 1);
        assert_eq!(report.deleted_in(Collection::NonConformity), 1);
        assert_eq!(report.deleted_in(Collection::Determination), 1);
        assert_eq!(report.deleted_in(Collection::Photo), 1);

        let photos: Vec<Photo> = engine
            .store()
            .list(&Filter::eq("unit_id", unit.id.as_str()), Some("created_at"), None)
            .unwrap();
        assert_eq!(photos, vec![kept]);
        assert_eq!(nc_numbers(&engine, &unit.id), vec![1, 2]);
        assert!(engine.validator().validate(&unit.id).unwrap().is_clean());
    }

    #[test]
    fn ambiguous_legacy_link_survives_source_delete() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 14").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let a = engine
            .sagas()
            .record_manual_finding(&unit.id, ManualFindingInput::new("Vazamento na adutora"))
            .unwrap();
        engine
            .sagas()
            .record_manual_finding(&unit.id, ManualFindingInput::new("Vazamento na adutora"))
            .unwrap();
        let legacy = engine
            .store()
            .insert(&NonConformity {
                id: String::new(),
                unit_id: unit.id.clone(),
                source_id: None,
                source_kind: None,
                number: 1,
                article: "art. 3".into(),
                description: "A Constatação C1 não cumpre o disposto no art. 3. Vazamento na adutora"
                    .into(),
                created_at: engine.clock().now(),
            })
            .unwrap();

        let report = engine.cascade().delete_manual_finding(&a.finding.id).unwrap();
        assert_eq!(report.ambiguous, vec![legacy.id.clone()]);
        assert_eq!(report.deleted_in(Collection::NonConformity), 0);
        assert!(engine
            .store()
            .find::<NonConformity>(&legacy.id)
            .unwrap()
            .is_some());
    }

    #[test]
    fn delete_non_conformity_hands_back_pending_repair() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 15").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let first = finding(&engine, &unit.id, "Cloro residual abaixo do mínimo");
        finding(&engine, &unit.id, "Extintor vencido");
        let nc_id = first.chain.unwrap().non_conformity.id;

        let pending = engine.cascade().delete_non_conformity(&nc_id).unwrap();
        assert_eq!(pending.unit_id, unit.id);
        assert_eq!(pending.case_id, case.id);
        assert!(engine.store().find::<NonConformity>(&nc_id).unwrap().is_none());
        let dets: Vec<Determination> = engine
            .store()
            .list(&Filter::eq("unit_id", unit.id.as_str()), Some("number"), None)
            .unwrap();
        assert_eq!(dets.len(), 1);

        let repair = pending.resolve(&engine.validator()).unwrap();
        assert!(repair.is_noop());
        assert!(repair.flagged.iter().any(|v| matches!(
            v,
            Violation::NonConformityCountMismatch { source_id, expected: 1, found: 0 }
                if *source_id == first.finding.id
        )));
        assert!(repair.flagged.iter().any(|v| matches!(
            v,
            Violation::NumberingGap { kind: SequenceKind::NaoConformidade, .. }
        )));
    }

    #[test]
    fn delete_case_removes_everything() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 16").unwrap();
        seed_unit(&engine, &case.id, "ETA", 1);
        seed_unit(&engine, &case.id, "ETE", 2);
        engine.sagas().issue_infraction_notice(&case.id).unwrap();

        let report = engine.cascade().delete_case(&case.id).unwrap();
        assert_eq!(report.deleted_in(Collection::Unit), 2);
        assert_eq!(report.deleted_in(Collection::NonConformity), 3);
        assert_eq!(report.deleted_in(Collection::InfractionNotice), 1);
        assert_eq!(report.deleted_in(Collection::Case), 1);
        assert_eq!(report.total_deleted(), 2 + 3 + 3 + 3 + 1 + 1);
        assert!(engine.store().find::<Case>(&case.id).unwrap().is_none());
    }
}
