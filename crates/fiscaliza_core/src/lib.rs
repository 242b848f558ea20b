//! # Fiscaliza Core
//!
//! Numbering, cascade and consistency engine for Fiscaliza.
//!
//! Inspection records carry dense, human-readable sequence numbers scoped to
//! a case: constatações `C1, C2, ...`, non-conformities `NC1, ...`,
//! determinations `D1, ...` and recommendations `R1, ...`. This crate
//! provides:
//!
//! - The [`EntityStore`] contract the engine runs against, and
//!   [`TableEntityStore`] over local table persistence
//! - [`NumberingEngine`]: next numbers derived from stored records
//! - [`CreationSaga`]: multi-step creation with compensating rollback
//! - [`CascadeCoordinator`]: cascading deletes and the renumbering pass
//! - [`ConsistencyValidator`]: invariant checks and idempotent repair
//!
//! ## Invariants
//!
//! After every engine operation, within a case:
//!
//! 1. each sequence, walked unit by unit in creation order, runs `1..=n`
//! 2. every non-conformity references a source of its unit, and every
//!    determination a non-conformity of its unit
//! 3. a source raising a non-conformity has exactly one, others have none
//! 4. children are deleted before their parents
//!
//! [`CascadeCoordinator::delete_non_conformity`] is the exception: it
//! returns a [`PendingRepair`] to resolve.
//!
//! ## Example
//!
//! ```rust
//! use fiscaliza_core::{
//!     Answer, AnswerInput, ChecklistCatalog, ChecklistItem, Engine, TableEntityStore,
//! };
//! use fiscaliza_storage::MemoryBackend;
//! use std::sync::Arc;
//!
//! let engine = Engine::new(TableEntityStore::new(Arc::new(MemoryBackend::new())));
//! let case = engine.open_case("Fiscalização 12/2024").unwrap();
//! let unit = engine.add_unit(&case.id, "ETA Norte").unwrap();
//! let item = engine
//!     .register_checklist_item(&ChecklistItem {
//!         id: String::new(),
//!         question: "Há laudo de potabilidade?".into(),
//!         article: "art. 3 da Portaria 888/2021".into(),
//!         produces_non_conformity: true,
//!         determination_template: Some("apresentar o laudo.".into()),
//!         recommendation_template: None,
//!     })
//!     .unwrap();
//!
//! let recorded = engine
//!     .sagas()
//!     .record_checklist_answers(
//!         &unit.id,
//!         &[AnswerInput::new(&item.id, Answer::No)],
//!         &mut ChecklistCatalog::new(),
//!     )
//!     .unwrap();
//!
//! let chain = recorded[0].chain.as_ref().unwrap();
//! assert_eq!(chain.non_conformity.number, 1);
//! assert_eq!(
//!     chain.determination.as_ref().unwrap().description,
//!     "Para sanar NC1, apresentar o laudo."
//! );
//! assert!(engine.validator().validate(&unit.id).unwrap().is_clean());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod clock;
mod collection;
mod config;
mod engine;
mod entity;
mod error;
mod hierarchy;
mod numbering;
mod saga;
mod store;
mod text;
mod validator;

pub use cascade::{
    CascadeCoordinator, CascadeReport, NumberChange, PendingRepair, RenumberReport, RenumberScope,
};
pub use clock::MonotonicClock;
pub use collection::{
    compare_values, sort_records, Collection, Fields, Filter, Record, LOCAL_ID_FIELD,
    SYNC_STATUS_FIELD,
};
pub use config::EngineConfig;
pub use engine::Engine;
pub use entity::{
    Answer, Case, ChecklistItem, ChecklistResponse, Determination, DeterminationStatus, Entity,
    InfractionNotice, ManualFinding, NonConformity, Photo, Recommendation, RecommendationOrigin,
    SourceKind, SourceRecord, SyncStatus, Unit,
};
pub use error::{CoreError, CoreResult};
pub use hierarchy::{SourceLink, UnitRecords};
pub use numbering::{format_infraction_number, NumberingEngine, SequenceKind};
pub use saga::{
    AnswerInput, ChecklistCatalog, CreationSaga, FindingChain, FindingDetails, ManualFindingInput,
    RecordedAnswer, RecordedFinding, RetractReport, Saga,
};
pub use store::{patch, EntityStore, EntityStoreExt, TableEntityStore};
pub use text::{
    compose_determination_description, compose_nc_description, constatacao_prefix,
    contains_token, has_constatacao_reference, legacy_prefix,
};
pub use validator::{ConsistencyValidator, RepairReport, ValidationReport, Violation};
