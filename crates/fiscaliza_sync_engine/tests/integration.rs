//! End-to-end tests: the engine running offline over a replicated store,
//! then replaying against the remote service.

use fiscaliza_core::{
    Answer, AnswerInput, ChecklistCatalog, ChecklistItem, Collection, Engine, EntityStore,
    Fields, Filter, ManualFindingInput, Record, TableEntityStore, LOCAL_ID_FIELD,
    SYNC_STATUS_FIELD, patch,
};
use fiscaliza_storage::{LogBackend, MemoryBackend, TableBackend};
use fiscaliza_sync_engine::{
    EntryStatus, MemoryRemote, RemoteOp, ReplicatedStore, SyncConfig, SyncEngine, SyncError,
    SyncOperation, SyncState,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Replicated = ReplicatedStore<Arc<MemoryRemote>>;

fn replicated(remote: &Arc<MemoryRemote>, backend: Arc<dyn TableBackend>) -> Arc<Replicated> {
    Arc::new(ReplicatedStore::open(Arc::clone(remote), backend, SyncConfig::new("tablet-07")).unwrap())
}

fn laudo_item() -> ChecklistItem {
    ChecklistItem {
        id: String::new(),
        question: "Há laudo de potabilidade?".into(),
        article: "art. 3 da Portaria 888/2021".into(),
        produces_non_conformity: true,
        determination_template: Some("apresentar o laudo.".into()),
        recommendation_template: None,
    }
}

/// A field session: two units, a checklist chain, manual findings and one
/// deletion that renumbers what follows. Returns the case id.
fn field_session<S: EntityStore>(engine: &Engine<S>) -> String {
    let case = engine.open_case("Fiscalização 7/2024").unwrap();
    let norte = engine.add_unit(&case.id, "ETA Norte").unwrap();
    let sul = engine.add_unit(&case.id, "ETA Sul").unwrap();
    let item = engine.register_checklist_item(&laudo_item()).unwrap();

    let sagas = engine.sagas();
    sagas
        .record_checklist_answers(
            &norte.id,
            &[AnswerInput::new(&item.id, Answer::No)],
            &mut ChecklistCatalog::new(),
        )
        .unwrap();
    let doomed = sagas
        .record_manual_finding(
            &norte.id,
            ManualFindingInput::new("Reservatório sem tampa")
                .with_non_conformity("art. 12 da Resolução 5/2019")
                .with_determination("instalar tampa."),
        )
        .unwrap();
    sagas
        .record_manual_finding(&norte.id, ManualFindingInput::new("Casa de química limpa"))
        .unwrap();
    sagas
        .record_manual_finding(
            &sul.id,
            ManualFindingInput::new("Hidrômetro sem lacre")
                .with_non_conformity("art. 20 da Resolução 5/2019")
                .with_determination("lacrar o hidrômetro."),
        )
        .unwrap();
    engine
        .add_photo(&sul.id, None, "file:///sdcard/fotos/eta-sul-1.jpg")
        .unwrap();

    engine
        .cascade()
        .delete_manual_finding(&doomed.finding.id)
        .unwrap();
    case.id
}

/// Every record of a case with ids replaced by stable labels and clock
/// fields dropped, so two runs can be compared.
fn graph(read: impl Fn(Collection) -> Vec<Record>) -> Vec<(Collection, Vec<Fields>)> {
    let mut by_collection = Vec::new();
    let mut labels: HashMap<String, String> = HashMap::new();
    for collection in Collection::ALL {
        let records = read(collection);
        for (index, record) in records.iter().enumerate() {
            labels.insert(record.id.clone(), format!("{collection}#{index}"));
        }
        by_collection.push((collection, records));
    }

    by_collection
        .into_iter()
        .map(|(collection, records)| {
            let normalized = records
                .into_iter()
                .map(|record| {
                    record
                        .fields
                        .into_iter()
                        .filter(|(key, _)| {
                            !matches!(
                                key.as_str(),
                                "created_at" | "issued_at" | "due_date" | SYNC_STATUS_FIELD | LOCAL_ID_FIELD
                            )
                        })
                        .map(|(key, value)| {
                            let value = match value {
                                Value::String(s) => {
                                    Value::String(labels.get(&s).cloned().unwrap_or(s))
                                }
                                other => other,
                            };
                            (key, value)
                        })
                        .collect()
                })
                .collect();
            (collection, normalized)
        })
        .collect()
}

fn all_records<S: EntityStore>(store: &S, collection: Collection) -> Vec<Record> {
    store
        .filter(collection, &Filter::all(), Some("created_at"), None)
        .unwrap()
}

#[test]
fn offline_session_replays_to_the_online_graph() {
    let reference = TableEntityStore::new(Arc::new(MemoryBackend::new()));
    let online_case = field_session(&Engine::new(reference.clone()));

    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    let engine = Engine::new(Arc::clone(&store));
    let offline_case = field_session(&engine);
    assert!(offline_case.starts_with("local-"));
    assert!(engine.validator().validate_case(&offline_case).unwrap().is_clean());
    assert_eq!(remote.calls().len(), 0);

    let queued = store.queue().entries().unwrap();
    assert!(queued.iter().any(|e| e.operation == SyncOperation::Update));
    assert!(queued.iter().any(|e| e.operation == SyncOperation::Delete));

    remote.set_connected(true);
    let sync = SyncEngine::new(Arc::clone(&store));
    let report = sync.replay().unwrap();
    assert!(report.is_complete(), "{report:?}");
    assert!(report.failures.is_empty());
    assert_eq!(sync.state(), SyncState::Synced);

    let expected = graph(|c| all_records(&reference, c));
    let replayed = graph(|c| remote.snapshot(c).unwrap());
    assert_eq!(replayed, expected);

    let remote_case = store.id_map().remote_id(&offline_case).unwrap().unwrap();
    assert!(!remote_case.starts_with("local-"));
    assert!(engine.validator().validate_case(&remote_case).unwrap().is_clean());
    assert!(reference
        .get(Collection::Case, &online_case)
        .is_ok());
}

#[test]
fn mirror_is_relinked_and_synced_after_replay() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    field_session(&Engine::new(Arc::clone(&store)));

    remote.set_connected(true);
    SyncEngine::new(Arc::clone(&store)).replay().unwrap();

    for collection in Collection::ALL {
        let local = all_records(store.local(), collection);
        assert_eq!(local.len(), remote.snapshot(collection).unwrap().len());
        for record in local {
            assert!(!record.id.starts_with("local-"), "{collection} {}", record.id);
            assert_eq!(record.fields[SYNC_STATUS_FIELD], "synced");
            for (key, value) in &record.fields {
                if key == LOCAL_ID_FIELD {
                    continue;
                }
                if let Value::String(s) = value {
                    assert!(!s.starts_with("local-"), "{collection}.{key} = {s}");
                }
            }
        }
    }
}

#[test]
fn rejected_parent_blocks_children_until_retried() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    let engine = Engine::new(Arc::clone(&store));
    let case = engine.open_case("Fiscalização 9/2024").unwrap();
    let unit = engine.add_unit(&case.id, "ETA Leste").unwrap();
    engine
        .sagas()
        .record_manual_finding(
            &unit.id,
            ManualFindingInput::new("Cloro residual abaixo do mínimo")
                .with_non_conformity("art. 34 da Portaria 888/2021")
                .with_determination("ajustar a dosagem."),
        )
        .unwrap();
    engine
        .add_photo(&unit.id, None, "file:///sdcard/fotos/eta-leste-1.jpg")
        .unwrap();

    remote.set_connected(true);
    remote.fail_next(Collection::NonConformity, RemoteOp::Create, 1);
    let sync = SyncEngine::new(Arc::clone(&store));
    let report = sync.replay().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].collection, Collection::NonConformity);
    assert!(report.failures[0].retryable);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].collection, Collection::Determination);
    assert_eq!(remote.snapshot(Collection::Photo).unwrap().len(), 1);
    assert_eq!(remote.snapshot(Collection::ManualFinding).unwrap().len(), 1);
    assert!(remote.snapshot(Collection::Determination).unwrap().is_empty());
    assert_eq!(sync.state(), SyncState::Error);

    let statuses: Vec<(Collection, EntryStatus)> = store
        .queue()
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| (e.collection, e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Collection::NonConformity, EntryStatus::Failed),
            (Collection::Determination, EntryStatus::Pending),
        ]
    );

    let report = sync.retry_failed().unwrap();
    assert!(report.is_complete());
    let nc = &remote.snapshot(Collection::NonConformity).unwrap()[0];
    let det = &remote.snapshot(Collection::Determination).unwrap()[0];
    assert_eq!(det.fields["non_conformity_id"], nc.id.as_str());
    assert_eq!(sync.state(), SyncState::Synced);
}

#[test]
fn writes_while_queue_drains_stay_ordered() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    let engine = Engine::new(Arc::clone(&store));
    let case = engine.open_case("Fiscalização 11/2024").unwrap();

    remote.set_connected(true);
    let unit = engine.add_unit(&case.id, "ETA Oeste").unwrap();
    assert!(unit.id.starts_with("local-"));
    assert_eq!(remote.calls().len(), 0);

    SyncEngine::new(Arc::clone(&store)).replay().unwrap();
    let units = remote.snapshot(Collection::Unit).unwrap();
    let cases = remote.snapshot(Collection::Case).unwrap();
    assert_eq!(units[0].fields["case_id"], cases[0].id.as_str());

    let online = engine.add_unit(&cases[0].id, "ETA Centro").unwrap();
    assert!(!online.id.starts_with("local-"));
    assert_eq!(remote.snapshot(Collection::Unit).unwrap().len(), 2);
}

#[test]
fn replay_without_connection_keeps_the_queue() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    Engine::new(Arc::clone(&store))
        .open_case("Fiscalização 2/2025")
        .unwrap();

    let sync = SyncEngine::new(Arc::clone(&store));
    assert!(matches!(sync.replay(), Err(SyncError::NotConnected)));
    assert_eq!(store.queue().len().unwrap(), 1);
    assert!(sync.stats().last_error.is_some());
}

#[test]
fn queue_and_mirror_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fiscaliza.log");
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);

    let case_id = {
        let backend: Arc<dyn TableBackend> = Arc::new(LogBackend::open(&path, true).unwrap());
        let store = replicated(&remote, backend);
        let engine = Engine::new(Arc::clone(&store));
        let case = engine.open_case("Fiscalização 4/2025").unwrap();
        let unit = engine.add_unit(&case.id, "ETA Norte").unwrap();
        engine
            .sagas()
            .record_manual_finding(&unit.id, ManualFindingInput::new("Sem extintor"))
            .unwrap();
        case.id
    };

    let backend: Arc<dyn TableBackend> = Arc::new(LogBackend::open(&path, true).unwrap());
    let store = replicated(&remote, backend);
    assert_eq!(store.queue().len().unwrap(), 3);
    let case = store.local().get(Collection::Case, &case_id).unwrap();
    assert_eq!(case.fields[SYNC_STATUS_FIELD], "pending");

    remote.set_connected(true);
    let report = SyncEngine::new(Arc::clone(&store)).replay().unwrap();
    assert_eq!(report.sent, 3);
    assert_eq!(remote.snapshot(Collection::ManualFinding).unwrap()[0].fields["number"], 1);

    // New entries continue the persisted sequence.
    remote.set_connected(false);
    Engine::new(Arc::clone(&store))
        .open_case("Fiscalização 5/2025")
        .unwrap();
    let entries = store.queue().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].seq >= 3);
}

#[test]
fn offline_ids_keep_working_after_replay() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_connected(false);
    let store = replicated(&remote, Arc::new(MemoryBackend::new()));
    let engine = Engine::new(Arc::clone(&store));
    let sync = SyncEngine::new(Arc::clone(&store));

    let case = engine.open_case("Fiscalização 9/2024").unwrap();
    let unit = engine.add_unit(&case.id, "ETA Leste").unwrap();
    assert!(unit.id.starts_with("local-"));
    remote.set_connected(true);
    assert!(sync.replay().unwrap().is_complete());
    let unit_remote = store.id_map().remote_id(&unit.id).unwrap().unwrap();

    let online = engine
        .sagas()
        .record_manual_finding(
            &unit.id,
            ManualFindingInput::new("Cloro residual abaixo do mínimo")
                .with_non_conformity("art. 34 da Portaria 888/2021"),
        )
        .unwrap();
    assert_eq!(online.finding.unit_id, unit_remote);
    assert_eq!(online.finding.number, Some(1));
    let by_local_id = engine
        .store()
        .filter(
            Collection::ManualFinding,
            &Filter::eq("unit_id", unit.id.as_str()),
            None,
            None,
        )
        .unwrap();
    assert_eq!(by_local_id.len(), 1);

    remote.set_connected(false);
    let offline = engine
        .sagas()
        .record_manual_finding(&unit.id, ManualFindingInput::new("Grade de proteção solta"))
        .unwrap();
    assert_eq!(offline.finding.unit_id, unit_remote);
    assert_eq!(offline.finding.number, Some(2));
    engine
        .store()
        .update(Collection::Unit, &unit.id, patch("name", "ETA Leste II"))
        .unwrap();

    remote.set_connected(true);
    assert!(sync.replay().unwrap().is_complete());

    let findings = remote.snapshot(Collection::ManualFinding).unwrap();
    assert_eq!(findings.len(), 2);
    assert!(findings.iter().all(|f| f.fields["unit_id"] == unit_remote.as_str()));
    let mut numbers: Vec<u64> = findings
        .iter()
        .filter_map(|f| f.fields["number"].as_u64())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(
        remote.get(Collection::Unit, &unit_remote).unwrap().fields["name"],
        "ETA Leste II"
    );
    assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
}
