//! Creation of numbered records: the finding chain and its siblings.

use super::Saga;
use crate::cascade::{CascadeCoordinator, RenumberReport, RenumberScope};
use crate::collection::{Collection, Fields, Filter};
use crate::engine::Ctx;
use crate::entity::{
    Answer, Case, ChecklistItem, ChecklistResponse, Determination, DeterminationStatus,
    InfractionNotice, ManualFinding, NonConformity, Recommendation, RecommendationOrigin,
    SourceRecord, Unit,
};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::UnitRecords;
use crate::numbering::{NumberingEngine, SequenceKind};
use crate::store::{patch, EntityStore, EntityStoreExt};
use crate::text::{compose_determination_description, compose_nc_description};
use chrono::{Datelike, Days};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Text composed into the records of a finding chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingDetails {
    /// Legal article the finding violates.
    pub article: String,
    /// Free text appended to the non-conformity description.
    pub text: String,
    /// Corrective text; a determination is created only when present.
    pub determination_text: Option<String>,
}

impl FindingDetails {
    /// Creates details without a determination.
    pub fn new(article: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            article: article.into(),
            text: text.into(),
            determination_text: None,
        }
    }

    /// Adds the corrective text of a determination.
    #[must_use]
    pub fn with_determination(mut self, text: impl Into<String>) -> Self {
        self.determination_text = Some(text.into());
        self
    }

    /// Builds details from a checklist item and the inspector's note.
    ///
    /// The note is the description text; the question stands in when the
    /// note is empty.
    pub fn from_item(item: &ChecklistItem, note: &str) -> Self {
        let text = if note.trim().is_empty() {
            item.question.clone()
        } else {
            note.to_string()
        };
        Self {
            article: item.article.clone(),
            text,
            determination_text: item.determination_template.clone(),
        }
    }
}

/// Records written by one finding chain.
#[derive(Debug, Clone)]
pub struct FindingChain {
    /// The response or finding carrying the constatação.
    pub source: SourceRecord,
    /// The raised non-conformity.
    pub non_conformity: NonConformity,
    /// The determination, when a corrective text was given.
    pub determination: Option<Determination>,
    /// The renumbering pass that followed, if one ran.
    pub renumber: Option<RenumberReport>,
}

impl FindingChain {
    fn refresh<S: EntityStore + ?Sized>(&mut self, store: &S) -> CoreResult<()> {
        self.source = match &self.source {
            SourceRecord::Response(r) => SourceRecord::Response(store.fetch(&r.id)?),
            SourceRecord::Finding(f) => SourceRecord::Finding(store.fetch(&f.id)?),
        };
        self.non_conformity = store.fetch(&self.non_conformity.id)?;
        if let Some(d) = &self.determination {
            self.determination = Some(store.fetch(&d.id)?);
        }
        Ok(())
    }
}

/// Records removed by [`CreationSaga::retract_finding_chain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetractReport {
    /// The response or finding left in place.
    pub source_id: String,
    /// Deleted non-conformities.
    pub non_conformities: Vec<String>,
    /// Deleted determinations.
    pub determinations: Vec<String>,
}

/// One answer to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerInput {
    /// Answered checklist item.
    pub item_id: String,
    /// The answer.
    pub answer: Answer,
    /// Inspector's note.
    pub note: String,
}

impl AnswerInput {
    /// Creates an answer without a note.
    pub fn new(item_id: impl Into<String>, answer: Answer) -> Self {
        Self {
            item_id: item_id.into(),
            answer,
            note: String::new(),
        }
    }

    /// Sets the inspector's note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

/// What recording or changing an answer wrote.
#[derive(Debug, Clone)]
pub struct RecordedAnswer {
    /// The stored response.
    pub response: ChecklistResponse,
    /// The finding chain raised by a negative answer.
    pub chain: Option<FindingChain>,
    /// Records removed because the answer stopped raising a non-conformity.
    pub retracted: Option<RetractReport>,
    /// The recommendation raised by a negative answer.
    pub recommendation: Option<Recommendation>,
}

/// A manual finding to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualFindingInput {
    /// Finding text.
    pub text: String,
    /// Ordering key; appended after the unit's last finding when `None`.
    pub ordem: Option<u32>,
    /// Legal article, for findings raising a non-conformity.
    pub article: Option<String>,
    /// Corrective text of the determination.
    pub determination_text: Option<String>,
}

impl ManualFindingInput {
    /// Creates a finding that raises no non-conformity.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ordem: None,
            article: None,
            determination_text: None,
        }
    }

    /// Makes the finding raise a non-conformity against `article`.
    #[must_use]
    pub fn with_non_conformity(mut self, article: impl Into<String>) -> Self {
        self.article = Some(article.into());
        self
    }

    /// Adds the corrective text of a determination.
    #[must_use]
    pub fn with_determination(mut self, text: impl Into<String>) -> Self {
        self.determination_text = Some(text.into());
        self
    }

    /// Sets the ordering key.
    #[must_use]
    pub fn at_ordem(mut self, ordem: u32) -> Self {
        self.ordem = Some(ordem);
        self
    }
}

/// What recording a manual finding wrote.
#[derive(Debug, Clone)]
pub struct RecordedFinding {
    /// The stored finding.
    pub finding: ManualFinding,
    /// The chain raised, for findings producing a non-conformity.
    pub chain: Option<FindingChain>,
    /// The renumbering pass that followed, if one ran.
    pub renumber: Option<RenumberReport>,
}

/// Checklist items loaded during one call.
///
/// Passed explicitly to batch operations so that item lookups are shared
/// within the call and never outlive it.
#[derive(Debug, Default)]
pub struct ChecklistCatalog {
    items: HashMap<String, ChecklistItem>,
    loads: usize,
}

impl ChecklistCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog preloaded with items.
    pub fn with_items(items: impl IntoIterator<Item = ChecklistItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            loads: 0,
        }
    }

    /// Returns an item, loading it from the store on first use.
    pub fn item<S: EntityStore + ?Sized>(&mut self, store: &S, id: &str) -> CoreResult<&ChecklistItem> {
        if !self.items.contains_key(id) {
            let item: ChecklistItem = store.fetch(id)?;
            self.loads += 1;
            self.items.insert(id.to_string(), item);
        }
        self.items
            .get(id)
            .ok_or_else(|| CoreError::not_found(Collection::ChecklistItem, id))
    }

    /// Returns how many items were read from the store.
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Returns the number of cached items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct ChainState {
    source: SourceRecord,
    created_source: bool,
    previous_source: Option<Fields>,
    constatacao: u32,
    non_conformity: Option<NonConformity>,
    determination: Option<Determination>,
}

/// Creation operations that write several numbered records.
pub struct CreationSaga<'a, S: ?Sized> {
    ctx: Ctx<'a, S>,
}

impl<'a, S: EntityStore + ?Sized> CreationSaga<'a, S> {
    pub(crate) fn new(ctx: Ctx<'a, S>) -> Self {
        Self { ctx }
    }

    fn numbering(&self) -> NumberingEngine<'a, S> {
        NumberingEngine::new(self.ctx)
    }

    fn renumber_from(&self, unit: &Unit) -> CoreResult<Option<RenumberReport>> {
        if !self.ctx.config.renumber_after_create {
            return Ok(None);
        }
        CascadeCoordinator::new(self.ctx)
            .renumber(&unit.case_id, RenumberScope::FromUnit(unit.id.clone()))
            .map(Some)
    }

    /// Creates a constatação, its non-conformity and, when a corrective
    /// text is given, its determination.
    ///
    /// `source` may be new (empty id) or already stored. Steps:
    ///
    /// 1. assign the constatação number, keeping one the stored source
    ///    already carries
    /// 2. create or update the source
    /// 3. create the non-conformity, linked through `source_id`
    /// 4. create the determination, pending, due after the default deadline
    ///
    /// A failure in steps 3 or 4 undoes the earlier steps, so either every
    /// record of the chain is visible or none is.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Validation`] if the source does not raise a
    ///   non-conformity, belongs to another unit or already has one
    /// - [`CoreError::NotFound`] if the unit does not exist
    /// - [`CoreError::SagaFailure`] or [`CoreError::UnrecoverableInconsistency`]
    ///   if a step failed
    pub fn create_finding_chain(
        &self,
        unit_id: &str,
        source: SourceRecord,
        details: &FindingDetails,
    ) -> CoreResult<FindingChain> {
        let unit = self.check_chain_input(unit_id, &source, details)?;
        let mut source = source;
        source.set_unit_id(&unit.id);
        let mut chain = self.run_chain(&unit, source, details)?;
        if let Some(report) = self.renumber_from(&unit)? {
            chain.refresh(self.ctx.store)?;
            chain.renumber = Some(report);
        }
        Ok(chain)
    }

    fn check_chain_input(
        &self,
        unit_id: &str,
        source: &SourceRecord,
        details: &FindingDetails,
    ) -> CoreResult<Unit> {
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        if source.unit_id() != unit_id && source.unit_id() != unit.id {
            return Err(CoreError::validation(format!(
                "source belongs to unit {}, not {unit_id}",
                source.unit_id()
            )));
        }
        if !source.requires_non_conformity() {
            return Err(CoreError::validation(
                "source does not raise a non-conformity",
            ));
        }
        if details.article.trim().is_empty() {
            return Err(CoreError::validation("missing legal article"));
        }
        if !source.id().is_empty() {
            let existing = self.ctx.store.filter(
                Collection::NonConformity,
                &Filter::eq("source_id", source.id()),
                None,
                Some(1),
            )?;
            if !existing.is_empty() {
                return Err(CoreError::validation(format!(
                    "{} {} already has a non-conformity",
                    source.collection(),
                    source.id()
                )));
            }
        }
        Ok(unit)
    }

    fn run_chain(
        &self,
        unit: &Unit,
        source: SourceRecord,
        details: &FindingDetails,
    ) -> CoreResult<FindingChain> {
        let store = self.ctx.store;
        let clock = self.ctx.clock;
        let deadline_days = self.ctx.config.default_deadline_days;
        let numbering_engine = self.numbering();
        let numbering = &numbering_engine;
        let case_id = unit.case_id.as_str();
        let unit_id = unit.id.as_str();
        let collection = source.collection();
        let kind = source.kind();

        let mut state = ChainState {
            source,
            created_source: false,
            previous_source: None,
            constatacao: 0,
            non_conformity: None,
            determination: None,
        };

        let mut saga = Saga::new("finding_chain")
            .step("assign_constatacao", |st: &mut ChainState| {
                let stored = !st.source.id().is_empty();
                match st.source.number() {
                    Some(n) if stored => st.constatacao = n,
                    _ => {
                        st.constatacao =
                            numbering.next_number(case_id, unit_id, SequenceKind::Constatacao)?;
                        st.source.set_number(Some(st.constatacao));
                    }
                }
                Ok(())
            })
            .step_with_compensation(
                "persist_source",
                |st: &mut ChainState| {
                    let fields = st.source.to_fields()?;
                    if st.source.id().is_empty() {
                        let record = store.create(collection, fields)?;
                        st.source.set_id(record.id);
                        st.created_source = true;
                    } else {
                        let previous = store.get(collection, st.source.id())?;
                        st.previous_source = Some(previous.fields);
                        store.update(collection, st.source.id(), fields)?;
                    }
                    Ok(())
                },
                |st: &mut ChainState| {
                    if st.created_source {
                        store.delete(collection, st.source.id())
                    } else if let Some(previous) = st.previous_source.take() {
                        store.update(collection, st.source.id(), previous).map(|_| ())
                    } else {
                        Ok(())
                    }
                },
            )
            .step_with_compensation(
                "create_non_conformity",
                |st: &mut ChainState| {
                    let number =
                        numbering.next_number(case_id, unit_id, SequenceKind::NaoConformidade)?;
                    let nc = store.insert(&NonConformity {
                        id: String::new(),
                        unit_id: unit_id.to_string(),
                        source_id: Some(st.source.id().to_string()),
                        source_kind: Some(kind),
                        number,
                        article: details.article.clone(),
                        description: compose_nc_description(
                            st.constatacao,
                            &details.article,
                            &details.text,
                        ),
                        created_at: clock.now(),
                    })?;
                    debug!(nc_id = %nc.id, number, "created non-conformity");
                    st.non_conformity = Some(nc);
                    Ok(())
                },
                |st: &mut ChainState| match st.non_conformity.take() {
                    Some(nc) => store.delete(Collection::NonConformity, &nc.id),
                    None => Ok(()),
                },
            );

        if let Some(text) = details.determination_text.as_deref() {
            saga = saga.step("create_determination", move |st: &mut ChainState| {
                let nc = st
                    .non_conformity
                    .as_ref()
                    .ok_or_else(|| CoreError::integrity("determination step ran without a non-conformity"))?;
                let number = numbering.next_number(case_id, unit_id, SequenceKind::Determinacao)?;
                let created_at = clock.now();
                let due_date = created_at
                    .date_naive()
                    .checked_add_days(Days::new(u64::from(deadline_days)))
                    .ok_or_else(|| CoreError::validation("determination deadline out of range"))?;
                let determination = store.insert(&Determination {
                    id: String::new(),
                    unit_id: unit_id.to_string(),
                    non_conformity_id: nc.id.clone(),
                    number,
                    description: compose_determination_description(nc.number, text),
                    deadline_days,
                    due_date,
                    status: DeterminationStatus::Pending,
                    created_at,
                })?;
                debug!(determination_id = %determination.id, number, "created determination");
                st.determination = Some(determination);
                Ok(())
            });
        }

        saga.run(&mut state)?;

        let non_conformity = state
            .non_conformity
            .ok_or_else(|| CoreError::integrity("finding chain finished without a non-conformity"))?;
        info!(
            unit_id,
            source_id = %state.source.id(),
            constatacao = state.constatacao,
            nc = non_conformity.number,
            determination = state.determination.as_ref().map(|d| d.number),
            "created finding chain"
        );
        Ok(FindingChain {
            source: state.source,
            non_conformity,
            determination: state.determination,
            renumber: None,
        })
    }

    /// Removes the determinations and the non-conformity raised by a
    /// response or finding, leaving the source itself in place.
    ///
    /// Numbers of the remaining records are not touched; a renumbering pass
    /// closes the gaps when it is run.
    ///
    /// # Errors
    ///
    /// [`CoreError::Integrity`] if the only candidates are legacy records
    /// matching several sources by text.
    pub fn retract_finding_chain(&self, source_id: &str) -> CoreResult<RetractReport> {
        let source = self.find_source(source_id)?;
        let unit: Unit = self.ctx.store.fetch(source.unit_id())?;
        let records = UnitRecords::load(self.ctx, unit)?;
        let links = records.resolve_links(self.ctx.config.legacy_prefix_len);

        let linked = records.linked_to(&links, source_id);
        if linked.is_empty() {
            let ambiguous = records.ambiguous_for(&links, source_id);
            if !ambiguous.is_empty() {
                return Err(CoreError::integrity(format!(
                    "non-conformities {ambiguous:?} match {source_id} and other sources by text; \
                     relate them explicitly before retracting"
                )));
            }
        }

        let non_conformities: Vec<String> = linked.iter().map(|nc| nc.id.clone()).collect();
        let determinations: Vec<String> = linked
            .iter()
            .flat_map(|nc| records.determinations_of(&nc.id))
            .map(|d| d.id.clone())
            .collect();

        self.ctx
            .store
            .delete_many(Collection::Determination, &determinations)?;
        self.ctx
            .store
            .delete_many(Collection::NonConformity, &non_conformities)?;
        info!(
            source_id,
            non_conformities = non_conformities.len(),
            determinations = determinations.len(),
            "retracted finding chain"
        );
        Ok(RetractReport {
            source_id: source_id.to_string(),
            non_conformities,
            determinations,
        })
    }

    fn find_source(&self, id: &str) -> CoreResult<SourceRecord> {
        if let Some(r) = self.ctx.store.find::<ChecklistResponse>(id)? {
            return Ok(SourceRecord::Response(r));
        }
        match self.ctx.store.find::<ManualFinding>(id)? {
            Some(f) => Ok(SourceRecord::Finding(f)),
            None => Err(CoreError::not_found(Collection::ChecklistResponse, id)),
        }
    }

    /// Records a batch of checklist answers for a unit.
    ///
    /// Negative answers to items raising a non-conformity create a finding
    /// chain; negative answers to items with a recommendation text create a
    /// recommendation. One renumbering pass follows the whole batch.
    pub fn record_checklist_answers(
        &self,
        unit_id: &str,
        answers: &[AnswerInput],
        catalog: &mut ChecklistCatalog,
    ) -> CoreResult<Vec<RecordedAnswer>> {
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        let mut recorded = Vec::with_capacity(answers.len());

        for input in answers {
            let item = catalog.item(self.ctx.store, &input.item_id)?.clone();
            let mut response = ChecklistResponse {
                id: String::new(),
                unit_id: unit.id.clone(),
                item_id: item.id.clone(),
                answer: input.answer,
                note: input.note.clone(),
                number: None,
                produces_non_conformity: item.produces_non_conformity,
                created_at: self.ctx.clock.now(),
            };

            let chain = if response.requires_non_conformity() {
                let details = FindingDetails::from_item(&item, &input.note);
                let source = SourceRecord::Response(response.clone());
                self.check_chain_input(&unit.id, &source, &details)?;
                let chain = self.run_chain(&unit, source, &details)?;
                if let SourceRecord::Response(r) = &chain.source {
                    response = r.clone();
                }
                Some(chain)
            } else {
                if response.answer.is_observed() {
                    response.number = Some(self.numbering().next_number(
                        &unit.case_id,
                        &unit.id,
                        SequenceKind::Constatacao,
                    )?);
                }
                response = self.ctx.store.insert(&response)?;
                None
            };

            let recommendation = match (&item.recommendation_template, input.answer) {
                (Some(text), Answer::No) => Some(self.insert_recommendation(
                    &unit,
                    RecommendationOrigin::Checklist,
                    Some(&item.id),
                    text,
                )?),
                _ => None,
            };

            recorded.push(RecordedAnswer {
                response,
                chain,
                retracted: None,
                recommendation,
            });
        }

        if self.renumber_from(&unit)?.is_some() {
            for answer in &mut recorded {
                answer.response = self.ctx.store.fetch(&answer.response.id)?;
                if let Some(chain) = answer.chain.as_mut() {
                    chain.refresh(self.ctx.store)?;
                }
                if let Some(r) = answer.recommendation.as_mut() {
                    *r = self.ctx.store.fetch(&r.id)?;
                }
            }
        }
        debug!(unit_id = %unit.id, answers = recorded.len(), loads = catalog.loads(), "recorded answers");
        Ok(recorded)
    }

    /// Changes the answer of a stored response.
    ///
    /// An answer that stops raising a non-conformity retracts the chain.
    /// An answer that starts raising one creates the chain. When the
    /// response gains or loses its constatação number (a change to or from
    /// `NA`), the number is assigned or cleared and the unit renumbered.
    /// A retraction to `YES` keeps its number and leaves the remaining
    /// non-conformities and determinations as they are until a renumbering
    /// pass runs.
    pub fn change_answer(
        &self,
        response_id: &str,
        answer: Answer,
        catalog: &mut ChecklistCatalog,
    ) -> CoreResult<RecordedAnswer> {
        let current: ChecklistResponse = self.ctx.store.fetch(response_id)?;
        let had_chain = current.requires_non_conformity();
        let mut changed = current.clone();
        changed.answer = answer;

        if !had_chain && changed.requires_non_conformity() {
            let item = catalog.item(self.ctx.store, &changed.item_id)?.clone();
            let details = FindingDetails::from_item(&item, &changed.note);
            let unit_id = changed.unit_id.clone();
            let chain =
                self.create_finding_chain(&unit_id, SourceRecord::Response(changed), &details)?;
            let response = match &chain.source {
                SourceRecord::Response(r) => r.clone(),
                SourceRecord::Finding(_) => self.ctx.store.fetch(response_id)?,
            };
            return Ok(RecordedAnswer {
                response,
                chain: Some(chain),
                retracted: None,
                recommendation: None,
            });
        }

        let retracted = if had_chain && !changed.requires_non_conformity() {
            Some(self.retract_finding_chain(response_id)?)
        } else {
            None
        };

        if current.answer.is_observed() == answer.is_observed() {
            let response = self
                .ctx
                .store
                .patch_entity(response_id, answer_patch(answer)?)?;
            return Ok(RecordedAnswer {
                response,
                chain: None,
                retracted,
                recommendation: None,
            });
        }

        let unit: Unit = self.ctx.store.fetch(&current.unit_id)?;
        let number = if answer.is_observed() {
            Value::from(self.numbering().next_number(
                &unit.case_id,
                &unit.id,
                SequenceKind::Constatacao,
            )?)
        } else {
            Value::Null
        };
        let mut fields = answer_patch(answer)?;
        fields.insert("number".into(), number);
        let mut response: ChecklistResponse = self.ctx.store.patch_entity(response_id, fields)?;
        if self.renumber_from(&unit)?.is_some() {
            response = self.ctx.store.fetch(response_id)?;
        }
        debug!(response_id, number = ?response.number, "constatação number changed with answer");
        Ok(RecordedAnswer {
            response,
            chain: None,
            retracted,
            recommendation: None,
        })
    }

    /// Records a manual finding, raising its chain when an article is given.
    pub fn record_manual_finding(
        &self,
        unit_id: &str,
        input: ManualFindingInput,
    ) -> CoreResult<RecordedFinding> {
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        let ordem = match input.ordem {
            Some(ordem) => ordem,
            None => {
                let findings: Vec<ManualFinding> =
                    self.ctx.list(&Filter::eq("unit_id", unit.id.as_str()), "ordem")?;
                findings.iter().map(|f| f.ordem).max().unwrap_or(0) + 1
            }
        };
        let mut finding = ManualFinding {
            id: String::new(),
            unit_id: unit.id.clone(),
            ordem,
            number: None,
            produces_non_conformity: input.article.is_some(),
            text: input.text.clone(),
            created_at: self.ctx.clock.now(),
        };

        let chain = match &input.article {
            Some(article) => {
                let mut details = FindingDetails::new(article.clone(), input.text.clone());
                details.determination_text = input.determination_text.clone();
                let source = SourceRecord::Finding(finding.clone());
                self.check_chain_input(&unit.id, &source, &details)?;
                let chain = self.run_chain(&unit, source, &details)?;
                if let SourceRecord::Finding(f) = &chain.source {
                    finding = f.clone();
                }
                Some(chain)
            }
            None => {
                finding.number = Some(self.numbering().next_number(
                    &unit.case_id,
                    &unit.id,
                    SequenceKind::Constatacao,
                )?);
                finding = self.ctx.store.insert(&finding)?;
                None
            }
        };

        let mut recorded = RecordedFinding {
            finding,
            chain,
            renumber: None,
        };
        if let Some(report) = self.renumber_from(&unit)? {
            recorded.finding = self.ctx.store.fetch(&recorded.finding.id)?;
            if let Some(chain) = recorded.chain.as_mut() {
                chain.refresh(self.ctx.store)?;
            }
            recorded.renumber = Some(report);
        }
        Ok(recorded)
    }

    /// Creates a recommendation with the next R number.
    pub fn create_recommendation(
        &self,
        unit_id: &str,
        origin: RecommendationOrigin,
        item_id: Option<&str>,
        text: &str,
    ) -> CoreResult<Recommendation> {
        if text.trim().is_empty() {
            return Err(CoreError::validation("empty recommendation text"));
        }
        let unit: Unit = self.ctx.store.fetch(unit_id)?;
        let recommendation = self.insert_recommendation(&unit, origin, item_id, text)?;
        match self.renumber_from(&unit)? {
            Some(_) => self.ctx.store.fetch(&recommendation.id),
            None => Ok(recommendation),
        }
    }

    fn insert_recommendation(
        &self,
        unit: &Unit,
        origin: RecommendationOrigin,
        item_id: Option<&str>,
        text: &str,
    ) -> CoreResult<Recommendation> {
        let number =
            self.numbering()
                .next_number(&unit.case_id, &unit.id, SequenceKind::Recomendacao)?;
        self.ctx.store.insert(&Recommendation {
            id: String::new(),
            unit_id: unit.id.clone(),
            number,
            origin,
            item_id: item_id.map(str::to_string),
            description: text.to_string(),
            created_at: self.ctx.clock.now(),
        })
    }

    /// Issues an infraction notice in a case, numbered within the current
    /// calendar year.
    pub fn issue_infraction_notice(&self, case_id: &str) -> CoreResult<InfractionNotice> {
        let case: Case = self.ctx.store.fetch(case_id)?;
        let issued_at = self.ctx.clock.now();
        let year = issued_at.year();
        let number = self.numbering().next_infraction_number(year)?;
        let notice = self.ctx.store.insert(&InfractionNotice {
            id: String::new(),
            case_id: case.id,
            year,
            number,
            issued_at,
        })?;
        info!(case_id, label = %notice.label(), "issued infraction notice");
        Ok(notice)
    }
}

fn answer_patch(answer: Answer) -> CoreResult<Fields> {
    Ok(patch("answer", serde_json::to_value(answer)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::store::TableEntityStore;
    use fiscaliza_storage::MemoryBackend;
    use std::sync::Arc;

    fn engine() -> Engine<TableEntityStore> {
        Engine::new(TableEntityStore::new(Arc::new(MemoryBackend::new())))
    }

    fn item(engine: &Engine<TableEntityStore>, determination: Option<&str>) -> ChecklistItem {
        engine
            .register_checklist_item(&ChecklistItem {
                id: String::new(),
                question: "O reservatório está tampado?".into(),
                article: "art. 12 da Resolução 45/2019".into(),
                produces_non_conformity: true,
                determination_template: determination.map(str::to_string),
                recommendation_template: None,
            })
            .unwrap()
    }

    #[test]
    fn three_negative_answers_number_in_order() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 1").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, Some("tampar o reservatório."));

        let answers: Vec<_> = (0..3)
            .map(|i| AnswerInput::new(&item.id, Answer::No).with_note(format!("Reservatório {i} aberto")))
            .collect();
        let recorded = engine
            .sagas()
            .record_checklist_answers(&unit.id, &answers, &mut ChecklistCatalog::new())
            .unwrap();

        for (i, answer) in recorded.iter().enumerate() {
            let n = i as u32 + 1;
            let chain = answer.chain.as_ref().unwrap();
            assert_eq!(answer.response.number, Some(n));
            assert_eq!(chain.non_conformity.number, n);
            assert!(chain
                .non_conformity
                .description
                .starts_with(&format!("A Constatação C{n} não cumpre o disposto no art. 12")));
            let d = chain.determination.as_ref().unwrap();
            assert_eq!(d.number, n);
            assert_eq!(d.description, format!("Para sanar NC{n}, tampar o reservatório."));
            assert_eq!(d.deadline_days, 30);
            assert_eq!(d.status, DeterminationStatus::Pending);
            assert_eq!(d.due_date, d.created_at.date_naive() + Days::new(30));
        }
    }

    #[test]
    fn catalog_loads_each_item_once() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 2").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, None);

        let mut catalog = ChecklistCatalog::new();
        let answers = vec![
            AnswerInput::new(&item.id, Answer::Yes),
            AnswerInput::new(&item.id, Answer::NotApplicable),
            AnswerInput::new(&item.id, Answer::No),
        ];
        let recorded = engine
            .sagas()
            .record_checklist_answers(&unit.id, &answers, &mut catalog)
            .unwrap();

        assert_eq!(catalog.loads(), 1);
        assert_eq!(recorded[0].response.number, Some(1));
        assert_eq!(recorded[1].response.number, None);
        assert_eq!(recorded[2].response.number, Some(2));
        assert!(recorded[2].chain.as_ref().unwrap().determination.is_none());
    }

    #[test]
    fn chain_rejects_sources_without_non_conformity() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 3").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let response = ChecklistResponse {
            id: String::new(),
            unit_id: unit.id.clone(),
            item_id: "i1".into(),
            answer: Answer::Yes,
            note: String::new(),
            number: None,
            produces_non_conformity: true,
            created_at: engine.clock().now(),
        };
        let err = engine
            .sagas()
            .create_finding_chain(
                &unit.id,
                SourceRecord::Response(response),
                &FindingDetails::new("art. 1", "texto"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn existing_source_keeps_its_number() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 4").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, None);
        let mut catalog = ChecklistCatalog::new();
        let recorded = engine
            .sagas()
            .record_checklist_answers(
                &unit.id,
                &[
                    AnswerInput::new(&item.id, Answer::Yes),
                    AnswerInput::new(&item.id, Answer::Yes),
                ],
                &mut catalog,
            )
            .unwrap();

        let first = &recorded[0].response;
        let changed = engine
            .sagas()
            .change_answer(&first.id, Answer::No, &mut catalog)
            .unwrap();
        let chain = changed.chain.unwrap();
        assert_eq!(changed.response.number, Some(1));
        assert_eq!(changed.response.answer, Answer::No);
        assert_eq!(chain.non_conformity.number, 1);
        assert!(chain.non_conformity.description.contains("C1 "));
    }

    #[test]
    fn answers_to_and_from_na_keep_constatacoes_dense() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 9").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, Some("tampar o reservatório."));
        let mut catalog = ChecklistCatalog::new();
        let recorded = engine
            .sagas()
            .record_checklist_answers(
                &unit.id,
                &[
                    AnswerInput::new(&item.id, Answer::Yes),
                    AnswerInput::new(&item.id, Answer::Yes),
                    AnswerInput::new(&item.id, Answer::No),
                ],
                &mut catalog,
            )
            .unwrap();
        let number_of = |id: &str| engine.store().fetch::<ChecklistResponse>(id).unwrap().number;

        let cleared = engine
            .sagas()
            .change_answer(&recorded[0].response.id, Answer::NotApplicable, &mut catalog)
            .unwrap();
        assert_eq!(cleared.response.answer, Answer::NotApplicable);
        assert_eq!(cleared.response.number, None);
        assert_eq!(number_of(&recorded[1].response.id), Some(1));
        assert_eq!(number_of(&recorded[2].response.id), Some(2));
        assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());

        let restored = engine
            .sagas()
            .change_answer(&recorded[0].response.id, Answer::Yes, &mut catalog)
            .unwrap();
        assert_eq!(restored.response.number, Some(1));
        assert_eq!(number_of(&recorded[1].response.id), Some(2));
        assert_eq!(number_of(&recorded[2].response.id), Some(3));
        assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
    }

    #[test]
    fn negative_answer_changed_to_na_retracts_and_renumbers() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 10").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, Some("corrigir."));
        let mut catalog = ChecklistCatalog::new();
        let recorded = engine
            .sagas()
            .record_checklist_answers(
                &unit.id,
                &[
                    AnswerInput::new(&item.id, Answer::No).with_note("primeira"),
                    AnswerInput::new(&item.id, Answer::No).with_note("segunda"),
                ],
                &mut catalog,
            )
            .unwrap();

        let changed = engine
            .sagas()
            .change_answer(&recorded[0].response.id, Answer::NotApplicable, &mut catalog)
            .unwrap();
        let retracted = changed.retracted.unwrap();
        assert_eq!(retracted.non_conformities.len(), 1);
        assert_eq!(changed.response.number, None);

        let sibling = recorded[1].chain.as_ref().unwrap();
        let response: ChecklistResponse = engine.store().fetch(&recorded[1].response.id).unwrap();
        let nc: NonConformity = engine.store().fetch(&sibling.non_conformity.id).unwrap();
        assert_eq!(response.number, Some(1));
        assert_eq!(nc.number, 1);
        assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
    }

    #[test]
    fn retract_leaves_source_and_siblings() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 5").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let item = item(&engine, Some("corrigir."));
        let mut catalog = ChecklistCatalog::new();
        let recorded = engine
            .sagas()
            .record_checklist_answers(
                &unit.id,
                &[
                    AnswerInput::new(&item.id, Answer::No).with_note("primeira"),
                    AnswerInput::new(&item.id, Answer::No).with_note("segunda"),
                ],
                &mut catalog,
            )
            .unwrap();

        let report = engine
            .sagas()
            .retract_finding_chain(&recorded[0].response.id)
            .unwrap();
        assert_eq!(report.non_conformities.len(), 1);
        assert_eq!(report.determinations.len(), 1);

        let source: ChecklistResponse = engine.store().fetch(&recorded[0].response.id).unwrap();
        assert_eq!(source.number, Some(1));
        let sibling = recorded[1].chain.as_ref().unwrap();
        let nc: NonConformity = engine.store().fetch(&sibling.non_conformity.id).unwrap();
        assert_eq!(nc.number, 2);
    }

    #[test]
    fn manual_findings_append_ordem() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 6").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();

        let plain = engine
            .sagas()
            .record_manual_finding(&unit.id, ManualFindingInput::new("Portão sem cadeado"))
            .unwrap();
        let raised = engine
            .sagas()
            .record_manual_finding(
                &unit.id,
                ManualFindingInput::new("Vazamento na casa de bombas")
                    .with_non_conformity("art. 7")
                    .with_determination("reparar o vazamento."),
            )
            .unwrap();

        assert_eq!(plain.finding.ordem, 1);
        assert_eq!(plain.finding.number, Some(1));
        assert!(plain.chain.is_none());
        assert_eq!(raised.finding.ordem, 2);
        assert_eq!(raised.finding.number, Some(2));
        let chain = raised.chain.unwrap();
        assert_eq!(chain.non_conformity.number, 1);
        assert_eq!(chain.determination.unwrap().number, 1);
    }

    #[test]
    fn infraction_notices_number_per_year() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 7").unwrap();
        let first = engine.sagas().issue_infraction_notice(&case.id).unwrap();
        let second = engine.sagas().issue_infraction_notice(&case.id).unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(
            second.label(),
            format!("AI nº 002/{}/DSB/AGEMS", second.year)
        );
    }

    #[test]
    fn recommendation_requires_text() {
        let engine = engine();
        let case = engine.open_case("Fiscalização 8").unwrap();
        let unit = engine.add_unit(&case.id, "ETA").unwrap();
        let err = engine
            .sagas()
            .create_recommendation(&unit.id, RecommendationOrigin::Manual, None, "  ")
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let r = engine
            .sagas()
            .create_recommendation(&unit.id, RecommendationOrigin::Manual, None, "Treinar operadores.")
            .unwrap();
        assert_eq!(r.number, 1);
    }
}
