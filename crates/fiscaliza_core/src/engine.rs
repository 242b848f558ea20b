//! The engine facade tying a store to its configuration.

use crate::cascade::CascadeCoordinator;
use crate::clock::MonotonicClock;
use crate::collection::Filter;
use crate::config::EngineConfig;
use crate::entity::{Case, ChecklistItem, Entity, Photo, Unit};
use crate::error::CoreResult;
use crate::numbering::NumberingEngine;
use crate::saga::CreationSaga;
use crate::store::{EntityStore, EntityStoreExt};
use crate::validator::ConsistencyValidator;
use tracing::{info, warn};

/// Borrowed view shared by the engine components.
pub(crate) struct Ctx<'a, S: ?Sized> {
    pub(crate) store: &'a S,
    pub(crate) config: &'a EngineConfig,
    pub(crate) clock: &'a MonotonicClock,
}

impl<S: ?Sized> Clone for Ctx<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for Ctx<'_, S> {}

impl<S: EntityStore + ?Sized> Ctx<'_, S> {
    /// Lists entities under the configured query limit.
    pub(crate) fn list<E: Entity>(&self, filter: &Filter, sort: &str) -> CoreResult<Vec<E>> {
        let limit = self.config.query_limit;
        let found: Vec<E> = self.store.list(filter, Some(sort), Some(limit))?;
        if found.len() >= limit {
            warn!(
                collection = %E::COLLECTION,
                limit,
                "query reached the row limit; results may be truncated"
            );
        }
        Ok(found)
    }
}

/// Numbering, saga, cascade and validation operations over one store.
///
/// The engine itself holds no record state: every number is derived from
/// what the store returns at call time.
///
/// # Concurrency
///
/// A case must have a single writer. Two callers creating records in the
/// same unit can read the same count and assign duplicate numbers; the
/// validator reports such duplicates and a renumbering pass removes them.
///
/// # Example
///
/// ```rust
/// use fiscaliza_core::{Engine, SequenceKind, TableEntityStore};
/// use fiscaliza_storage::MemoryBackend;
/// use std::sync::Arc;
///
/// let engine = Engine::new(TableEntityStore::new(Arc::new(MemoryBackend::new())));
/// let case = engine.open_case("Fiscalização 3/2024").unwrap();
/// let unit = engine.add_unit(&case.id, "ETA Centro").unwrap();
/// let next = engine
///     .numbering()
///     .next_number(&case.id, &unit.id, SequenceKind::Constatacao)
///     .unwrap();
/// assert_eq!(next, 1);
/// ```
pub struct Engine<S> {
    store: S,
    config: EngineConfig,
    clock: MonotonicClock,
}

impl<S: EntityStore> Engine<S> {
    /// Creates an engine with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Creates an engine with the given configuration.
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            clock: MonotonicClock::new(),
        }
    }

    /// Replaces the clock stamping new records.
    #[must_use]
    pub fn with_clock(mut self, clock: MonotonicClock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the clock stamping new records.
    pub fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    pub(crate) fn ctx(&self) -> Ctx<'_, S> {
        Ctx {
            store: &self.store,
            config: &self.config,
            clock: &self.clock,
        }
    }

    /// Returns the sequence number calculator.
    pub fn numbering(&self) -> NumberingEngine<'_, S> {
        NumberingEngine::new(self.ctx())
    }

    /// Returns the creation sagas.
    pub fn sagas(&self) -> CreationSaga<'_, S> {
        CreationSaga::new(self.ctx())
    }

    /// Returns the cascade coordinator.
    pub fn cascade(&self) -> CascadeCoordinator<'_, S> {
        CascadeCoordinator::new(self.ctx())
    }

    /// Returns the consistency validator.
    pub fn validator(&self) -> ConsistencyValidator<'_, S> {
        ConsistencyValidator::new(self.ctx())
    }

    /// Opens a new case.
    pub fn open_case(&self, title: impl Into<String>) -> CoreResult<Case> {
        let case = self.store.insert(&Case {
            id: String::new(),
            title: title.into(),
            created_at: self.clock.now(),
        })?;
        info!(case_id = %case.id, "opened case");
        Ok(case)
    }

    /// Adds a unit to a case. Units are numbered after every existing unit.
    pub fn add_unit(&self, case_id: &str, name: impl Into<String>) -> CoreResult<Unit> {
        let case: Case = self.store.fetch(case_id)?;
        let unit = self.store.insert(&Unit {
            id: String::new(),
            case_id: case.id,
            name: name.into(),
            created_at: self.clock.now(),
        })?;
        info!(case_id = %unit.case_id, unit_id = %unit.id, "added unit");
        Ok(unit)
    }

    /// Mirrors a checklist item into the reference table.
    pub fn register_checklist_item(&self, item: &ChecklistItem) -> CoreResult<ChecklistItem> {
        self.store.insert(item)
    }

    /// Attaches an evidence photo to a unit, optionally to one of its records.
    pub fn add_photo(
        &self,
        unit_id: &str,
        record_id: Option<&str>,
        uri: impl Into<String>,
    ) -> CoreResult<Photo> {
        let unit: Unit = self.store.fetch(unit_id)?;
        self.store.insert(&Photo {
            id: String::new(),
            unit_id: unit.id,
            record_id: record_id.map(str::to_string),
            uri: uri.into(),
            created_at: self.clock.now(),
        })
    }
}
