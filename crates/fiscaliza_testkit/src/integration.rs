//! Cross-crate integration test helpers.
//!
//! Provides a harness that drives an engine through generated inspection
//! sessions and checks the case invariants after every step.

use crate::fixtures::scenarios;
use crate::generators::InspectionOp;
use fiscaliza_core::{
    AnswerInput, ChecklistCatalog, ChecklistItem, ChecklistResponse, CoreResult, Determination,
    Engine, EntityStore, EntityStoreExt, Filter, ManualFinding, ManualFindingInput, NonConformity,
    Recommendation, RecommendationOrigin, RenumberScope, SequenceKind, Unit,
};

/// A test harness running sessions against one case.
pub struct InspectionHarness<S> {
    /// The engine under test.
    pub engine: Engine<S>,
    /// The case every step acts on.
    pub case_id: String,
    items: Vec<ChecklistItem>,
    catalog: ChecklistCatalog,
    steps: usize,
}

impl<S: EntityStore> InspectionHarness<S> {
    /// Opens a case with one unit and a three-item catalog: an item raising
    /// a non-conformity with a determination, one raising it without, and
    /// one raising a recommendation.
    pub fn new(engine: Engine<S>) -> Self {
        let (case, _) = scenarios::case_with_units(&engine, 1);
        let mut bare = scenarios::nc_item(2);
        bare.determination_template = None;
        let items: Vec<ChecklistItem> = [scenarios::nc_item(1), bare, scenarios::advisory_item(3)]
            .iter()
            .map(|item| {
                engine
                    .register_checklist_item(item)
                    .expect("Failed to register item")
            })
            .collect();
        Self {
            engine,
            case_id: case.id,
            catalog: ChecklistCatalog::with_items(items.clone()),
            items,
            steps: 0,
        }
    }

    /// Returns the units of the case in creation order.
    pub fn units(&self) -> Vec<Unit> {
        self.engine
            .numbering()
            .case_units(&self.case_id)
            .expect("Failed to list units")
    }

    /// Returns how many steps have been applied.
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn unit_at(&self, position: usize) -> Option<Unit> {
        let units = self.units();
        if units.is_empty() {
            None
        } else {
            Some(units[position % units.len()].clone())
        }
    }

    fn in_unit<E: fiscaliza_core::Entity>(&self, unit_id: &str) -> Vec<E> {
        self.engine
            .store()
            .list(&Filter::eq("unit_id", unit_id), Some("created_at"), None)
            .expect("Failed to list records")
    }

    /// Applies one step.
    ///
    /// A change to `YES` that retracts a chain is followed by a renumbering
    /// pass over the case, since that retraction leaves the remaining
    /// numbers in place until one runs.
    pub fn apply(&mut self, op: &InspectionOp) -> CoreResult<()> {
        self.steps += 1;
        let sagas = self.engine.sagas();
        let cascade = self.engine.cascade();
        match op {
            InspectionOp::AddUnit => {
                let n = self.units().len() + 1;
                self.engine.add_unit(&self.case_id, format!("Unidade {n}"))?;
            }
            InspectionOp::RecordFinding {
                unit,
                raises_nc,
                with_determination,
                text,
            } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                let mut input = ManualFindingInput::new(text.clone());
                if *raises_nc {
                    input = input.with_non_conformity("art. 9 da Resolução 5/2019");
                    if *with_determination {
                        input = input.with_determination("sanar a irregularidade.");
                    }
                }
                sagas.record_manual_finding(&unit.id, input)?;
            }
            InspectionOp::Answer { unit, item, answer } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                let item = &self.items[item % self.items.len()];
                let answered = self
                    .in_unit::<ChecklistResponse>(&unit.id)
                    .iter()
                    .any(|r| r.item_id == item.id);
                if !answered {
                    sagas.record_checklist_answers(
                        &unit.id,
                        &[AnswerInput::new(&item.id, *answer)],
                        &mut self.catalog,
                    )?;
                }
            }
            InspectionOp::ChangeAnswer {
                unit,
                response,
                answer,
            } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                let responses = self.in_unit::<ChecklistResponse>(&unit.id);
                if responses.is_empty() {
                    return Ok(());
                }
                let target = &responses[response % responses.len()];
                let changed = sagas.change_answer(&target.id, *answer, &mut self.catalog)?;
                if changed.retracted.is_some() && answer.is_observed() {
                    cascade.renumber(&self.case_id, RenumberScope::Case)?;
                }
            }
            InspectionOp::Recommend { unit } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                sagas.create_recommendation(
                    &unit.id,
                    RecommendationOrigin::Manual,
                    None,
                    "Recomenda-se manter registro das manutenções.",
                )?;
            }
            InspectionOp::DeleteFinding { unit, finding } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                let findings = self.in_unit::<ManualFinding>(&unit.id);
                if !findings.is_empty() {
                    cascade.delete_manual_finding(&findings[finding % findings.len()].id)?;
                }
            }
            InspectionOp::DeleteResponse { unit, response } => {
                let Some(unit) = self.unit_at(*unit) else {
                    return Ok(());
                };
                let responses = self.in_unit::<ChecklistResponse>(&unit.id);
                if !responses.is_empty() {
                    cascade.delete_checklist_response(&responses[response % responses.len()].id)?;
                }
            }
            InspectionOp::DeleteUnit { unit } => {
                if let Some(unit) = self.unit_at(*unit) {
                    cascade.delete_unit(&unit.id)?;
                }
            }
            InspectionOp::Renumber => {
                cascade.renumber(&self.case_id, RenumberScope::Case)?;
            }
        }
        Ok(())
    }

    /// Returns the stored numbers of one sequence across the case, sorted.
    pub fn sequence(&self, kind: SequenceKind) -> Vec<u32> {
        let mut numbers = Vec::new();
        for unit in self.units() {
            match kind {
                SequenceKind::Constatacao => {
                    numbers.extend(
                        self.in_unit::<ChecklistResponse>(&unit.id)
                            .into_iter()
                            .filter_map(|r| r.number),
                    );
                    numbers.extend(
                        self.in_unit::<ManualFinding>(&unit.id)
                            .into_iter()
                            .filter_map(|f| f.number),
                    );
                }
                SequenceKind::NaoConformidade => numbers.extend(
                    self.in_unit::<NonConformity>(&unit.id)
                        .into_iter()
                        .map(|nc| nc.number),
                ),
                SequenceKind::Determinacao => numbers.extend(
                    self.in_unit::<Determination>(&unit.id)
                        .into_iter()
                        .map(|d| d.number),
                ),
                SequenceKind::Recomendacao => numbers.extend(
                    self.in_unit::<Recommendation>(&unit.id)
                        .into_iter()
                        .map(|r| r.number),
                ),
            }
        }
        numbers.sort_unstable();
        numbers
    }

    /// Asserts every sequence of the case is exactly `1..=n`.
    pub fn assert_gapless(&self) {
        for kind in [
            SequenceKind::Constatacao,
            SequenceKind::NaoConformidade,
            SequenceKind::Determinacao,
            SequenceKind::Recomendacao,
        ] {
            let numbers = self.sequence(kind);
            let expected: Vec<u32> = (1..).take(numbers.len()).collect();
            assert_eq!(
                numbers,
                expected,
                "{} sequence not dense after {} step(s)",
                kind.prefix(),
                self.steps
            );
        }
    }

    /// Asserts the validator finds nothing in the case.
    pub fn assert_clean(&self) {
        let report = self
            .engine
            .validator()
            .validate_case(&self.case_id)
            .expect("Failed to validate");
        assert!(
            report.is_clean(),
            "violations after {} step(s): {:?}",
            self.steps,
            report.violations
        );
    }
}

/// Offline replication helpers.
pub mod offline {
    use fiscaliza_core::Engine;
    use fiscaliza_storage::MemoryBackend;
    use fiscaliza_sync_engine::{MemoryRemote, ReplicatedStore, SyncConfig, SyncEngine};
    use std::sync::Arc;

    /// A replicated store over an in-memory remote service.
    pub type TestReplicated = ReplicatedStore<Arc<MemoryRemote>>;

    /// A device with its own mirror talking to a shared remote service.
    pub struct Device {
        /// The remote service.
        pub remote: Arc<MemoryRemote>,
        /// The device's replicated store.
        pub store: Arc<TestReplicated>,
        /// An engine running on the replicated store.
        pub engine: Engine<Arc<TestReplicated>>,
        /// The replay engine.
        pub sync: SyncEngine<Arc<MemoryRemote>>,
    }

    impl Device {
        /// Creates a device over `remote`, starting disconnected.
        pub fn offline(remote: &Arc<MemoryRemote>) -> Self {
            remote.set_connected(false);
            let store = Arc::new(
                ReplicatedStore::open(
                    Arc::clone(remote),
                    Arc::new(MemoryBackend::new()),
                    SyncConfig::new("test-device"),
                )
                .expect("Failed to open replicated store"),
            );
            Self {
                remote: Arc::clone(remote),
                engine: Engine::new(Arc::clone(&store)),
                sync: SyncEngine::new(Arc::clone(&store)),
                store,
            }
        }

        /// Reconnects and replays the queue, asserting it drains.
        pub fn reconnect_and_replay(&self) {
            self.remote.set_connected(true);
            let report = self.sync.replay().expect("Replay failed");
            assert!(report.is_complete(), "queue not drained: {report:?}");
        }

        /// Returns the remote id of a record created offline.
        pub fn remote_id(&self, local_id: &str) -> String {
            self.store
                .id_map()
                .remote_id(local_id)
                .expect("Failed to read id mapping")
                .expect("Id not mapped")
        }
    }
}
