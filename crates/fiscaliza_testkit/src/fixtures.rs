//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up engines over fresh local
//! stores and common inspection scenarios.

use fiscaliza_core::{Engine, TableEntityStore};
use fiscaliza_storage::{LogBackend, MemoryBackend, TableBackend, LOG_FILE_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// An engine over a fresh store, with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine<TableEntityStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over an in-memory store.
    pub fn memory() -> Self {
        Self {
            engine: Engine::new(TableEntityStore::new(Arc::new(MemoryBackend::new()))),
            temp_dir: None,
        }
    }

    /// Creates an engine over an indexed log in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = open_log(temp_dir.path());
        Self {
            engine: Engine::new(TableEntityStore::new(backend)),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Reopens the log of a file-based engine, as after a restart.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("Only file engines can be reopened");
        drop(self.engine);
        let backend = open_log(temp_dir.path());
        Self {
            engine: Engine::new(TableEntityStore::new(backend)),
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine<TableEntityStore>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

fn open_log(dir: &Path) -> Arc<dyn TableBackend> {
    Arc::new(LogBackend::open(&dir.join(LOG_FILE_NAME), true).expect("Failed to open log"))
}

/// Runs a test with an engine over an in-memory store.
///
/// # Example
///
/// ```rust
/// use fiscaliza_testkit::with_temp_engine;
///
/// with_temp_engine(|engine| {
///     let case = engine.open_case("Fiscalização 1/2024").unwrap();
///     assert!(!case.id.is_empty());
/// });
/// ```
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine<TableEntityStore>) -> R,
{
    let test_engine = TestEngine::memory();
    f(&test_engine.engine)
}

/// Runs a test with an engine over a temporary indexed log.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine<TableEntityStore>, &Path) -> R,
{
    let test_engine = TestEngine::file();
    let path = test_engine.path().expect("File engine should have a path");
    f(&test_engine.engine, &path)
}

/// Inspection scenario helpers.
pub mod scenarios {
    use fiscaliza_core::{
        Answer, AnswerInput, Case, ChecklistCatalog, ChecklistItem, Engine, EntityStore,
        ManualFindingInput, RecordedAnswer, RecordedFinding, Unit,
    };

    /// A checklist item raising a non-conformity with a determination.
    pub fn nc_item(index: usize) -> ChecklistItem {
        ChecklistItem {
            id: String::new(),
            question: format!("Item {index} atendido?"),
            article: format!("art. {index} da Portaria 888/2021"),
            produces_non_conformity: true,
            determination_template: Some(format!("regularizar o item {index}.")),
            recommendation_template: None,
        }
    }

    /// A checklist item producing only a recommendation.
    pub fn advisory_item(index: usize) -> ChecklistItem {
        ChecklistItem {
            id: String::new(),
            question: format!("Boa prática {index} adotada?"),
            article: String::new(),
            produces_non_conformity: false,
            determination_template: None,
            recommendation_template: Some(format!("Recomenda-se adotar a prática {index}.")),
        }
    }

    /// Registers `count` non-conformity items.
    pub fn register_nc_items<S: EntityStore>(engine: &Engine<S>, count: usize) -> Vec<ChecklistItem> {
        (1..=count)
            .map(|i| {
                engine
                    .register_checklist_item(&nc_item(i))
                    .expect("Failed to register item")
            })
            .collect()
    }

    /// Opens a case with `units` units named after their position.
    pub fn case_with_units<S: EntityStore>(engine: &Engine<S>, units: usize) -> (Case, Vec<Unit>) {
        let case = engine
            .open_case("Fiscalização de teste")
            .expect("Failed to open case");
        let units = (1..=units)
            .map(|i| {
                engine
                    .add_unit(&case.id, format!("Unidade {i}"))
                    .expect("Failed to add unit")
            })
            .collect();
        (case, units)
    }

    /// Answers `answer` to every item in one batch.
    pub fn answer_all<S: EntityStore>(
        engine: &Engine<S>,
        unit_id: &str,
        items: &[ChecklistItem],
        answer: Answer,
    ) -> Vec<RecordedAnswer> {
        let inputs: Vec<AnswerInput> = items
            .iter()
            .map(|item| AnswerInput::new(&item.id, answer))
            .collect();
        engine
            .sagas()
            .record_checklist_answers(unit_id, &inputs, &mut ChecklistCatalog::new())
            .expect("Failed to record answers")
    }

    /// Records a manual finding raising a non-conformity and a
    /// determination.
    pub fn finding_with_chain<S: EntityStore>(
        engine: &Engine<S>,
        unit_id: &str,
        text: &str,
    ) -> RecordedFinding {
        engine
            .sagas()
            .record_manual_finding(
                unit_id,
                ManualFindingInput::new(text)
                    .with_non_conformity("art. 7 da Resolução 5/2019")
                    .with_determination("corrigir a irregularidade."),
            )
            .expect("Failed to record finding")
    }

    /// A case of `units` units, each holding one finding chain.
    pub fn chained_case<S: EntityStore>(engine: &Engine<S>, units: usize) -> (Case, Vec<Unit>) {
        let (case, units) = case_with_units(engine, units);
        for (i, unit) in units.iter().enumerate() {
            finding_with_chain(engine, &unit.id, &format!("Constatação da unidade {}", i + 1));
        }
        (case, units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscaliza_core::Answer;

    #[test]
    fn memory_engine() {
        let engine = TestEngine::memory();
        assert!(engine.path().is_none());
        assert!(engine.open_case("Fiscalização 1/2024").is_ok());
    }

    #[test]
    fn file_engine_survives_reopen() {
        let engine = TestEngine::file();
        let (case, _) = scenarios::chained_case(&engine, 2);
        let engine = engine.reopen();
        assert_eq!(engine.numbering().case_units(&case.id).unwrap().len(), 2);
        assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
    }

    #[test]
    fn answer_scenario() {
        with_temp_engine(|engine| {
            let items = scenarios::register_nc_items(engine, 2);
            let (_, units) = scenarios::case_with_units(engine, 1);
            let recorded = scenarios::answer_all(engine, &units[0].id, &items, Answer::No);
            assert!(recorded.iter().all(|r| r.chain.is_some()));
        });
    }
}
