//! Numbered records: constatações, non-conformities, determinations and
//! recommendations.

use super::{impl_entity, Entity};
use crate::collection::{Collection, Fields};
use crate::error::CoreResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Answer to a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Answer {
    /// Compliant.
    #[serde(rename = "YES", alias = "SIM")]
    Yes,
    /// Not compliant.
    #[serde(rename = "NO", alias = "NAO", alias = "NÃO")]
    No,
    /// Not applicable.
    #[serde(rename = "NA")]
    NotApplicable,
}

impl Answer {
    /// Returns true if the answer carries a constatação number.
    pub fn is_observed(&self) -> bool {
        !matches!(self, Answer::NotApplicable)
    }
}

/// An answer to one checklist item within a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistResponse {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// Answered checklist item.
    pub item_id: String,
    /// The answer.
    pub answer: Answer,
    /// Inspector's note.
    #[serde(default)]
    pub note: String,
    /// Constatação number, when assigned.
    #[serde(default)]
    pub number: Option<u32>,
    /// Whether a negative answer raises a non-conformity.
    pub produces_non_conformity: bool,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

impl ChecklistResponse {
    /// Returns true if this response must carry exactly one non-conformity.
    pub fn requires_non_conformity(&self) -> bool {
        self.produces_non_conformity && self.answer == Answer::No
    }
}

/// A finding entered by hand, ordered by `ordem` within its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualFinding {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// Manual ordering key.
    pub ordem: u32,
    /// Constatação number, when assigned.
    #[serde(default)]
    pub number: Option<u32>,
    /// Whether the finding raises a non-conformity.
    pub produces_non_conformity: bool,
    /// Finding text.
    pub text: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// Which collection a non-conformity's source lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A [`ChecklistResponse`].
    Response,
    /// A [`ManualFinding`].
    ManualFinding,
}

impl SourceKind {
    /// Returns the collection holding sources of this kind.
    pub fn collection(&self) -> Collection {
        match self {
            SourceKind::Response => Collection::ChecklistResponse,
            SourceKind::ManualFinding => Collection::ManualFinding,
        }
    }
}

/// A record that can originate a non-conformity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRecord {
    /// A checklist response.
    Response(ChecklistResponse),
    /// A manual finding.
    Finding(ManualFinding),
}

impl SourceRecord {
    /// Returns the record id. Empty when not stored yet.
    pub fn id(&self) -> &str {
        match self {
            SourceRecord::Response(r) => &r.id,
            SourceRecord::Finding(f) => &f.id,
        }
    }

    /// Returns the owning unit.
    pub fn unit_id(&self) -> &str {
        match self {
            SourceRecord::Response(r) => &r.unit_id,
            SourceRecord::Finding(f) => &f.unit_id,
        }
    }

    pub(crate) fn set_unit_id(&mut self, unit_id: &str) {
        match self {
            SourceRecord::Response(r) => r.unit_id = unit_id.to_string(),
            SourceRecord::Finding(f) => f.unit_id = unit_id.to_string(),
        }
    }

    /// Returns the constatação number.
    pub fn number(&self) -> Option<u32> {
        match self {
            SourceRecord::Response(r) => r.number,
            SourceRecord::Finding(f) => f.number,
        }
    }

    /// Sets the constatação number.
    pub fn set_number(&mut self, number: Option<u32>) {
        match self {
            SourceRecord::Response(r) => r.number = number,
            SourceRecord::Finding(f) => f.number = number,
        }
    }

    /// Returns the source kind.
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRecord::Response(_) => SourceKind::Response,
            SourceRecord::Finding(_) => SourceKind::ManualFinding,
        }
    }

    /// Returns true if this record must carry exactly one non-conformity.
    pub fn requires_non_conformity(&self) -> bool {
        match self {
            SourceRecord::Response(r) => r.requires_non_conformity(),
            SourceRecord::Finding(f) => f.produces_non_conformity,
        }
    }

    /// Returns true if this record carries a constatação number.
    pub fn carries_number(&self) -> bool {
        match self {
            SourceRecord::Response(r) => r.answer.is_observed(),
            SourceRecord::Finding(_) => true,
        }
    }

    /// Returns the creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            SourceRecord::Response(r) => r.created_at,
            SourceRecord::Finding(f) => f.created_at,
        }
    }

    /// Returns the collection holding the record.
    pub fn collection(&self) -> Collection {
        self.kind().collection()
    }

    /// Returns the free text: the inspector's note or the finding text.
    pub fn text(&self) -> &str {
        match self {
            SourceRecord::Response(r) => &r.note,
            SourceRecord::Finding(f) => &f.text,
        }
    }

    /// Converts to a field map, without the id.
    pub fn to_fields(&self) -> CoreResult<Fields> {
        match self {
            SourceRecord::Response(r) => r.to_fields(),
            SourceRecord::Finding(f) => f.to_fields(),
        }
    }

    pub(crate) fn set_id(&mut self, id: String) {
        match self {
            SourceRecord::Response(r) => r.id = id,
            SourceRecord::Finding(f) => f.id = id,
        }
    }
}

/// A non-conformity raised by a response or finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonConformity {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// Originating response/finding. `None` on legacy records, which are
    /// related to their finding by text only.
    #[serde(default)]
    pub source_id: Option<String>,
    /// Collection of `source_id`.
    #[serde(default)]
    pub source_kind: Option<SourceKind>,
    /// NC number.
    pub number: u32,
    /// Legal article violated.
    #[serde(default)]
    pub article: String,
    /// Description; embeds the constatação token as written at creation.
    pub description: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a determination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminationStatus {
    /// Awaiting action.
    Pending,
    /// Corrected in time.
    Fulfilled,
    /// Not corrected, with an accepted justification.
    Justified,
    /// Not corrected.
    Unfulfilled,
}

/// A corrective determination attached to a non-conformity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Determination {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// The non-conformity to correct.
    pub non_conformity_id: String,
    /// D number.
    pub number: u32,
    /// Description; embeds the NC token as written at creation.
    pub description: String,
    /// Days allowed for correction.
    pub deadline_days: u32,
    /// Date the correction is due.
    pub due_date: NaiveDate,
    /// Current status.
    pub status: DeterminationStatus,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// Where a recommendation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationOrigin {
    /// Raised by a checklist item.
    Checklist,
    /// Entered by hand.
    Manual,
}

/// A recommendation linked to a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// R number.
    pub number: u32,
    /// Origin.
    pub origin: RecommendationOrigin,
    /// Checklist item that raised it, for checklist recommendations.
    #[serde(default)]
    pub item_id: Option<String>,
    /// Recommendation text.
    pub description: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

impl_entity!(ChecklistResponse, Collection::ChecklistResponse);
impl_entity!(ManualFinding, Collection::ManualFinding);
impl_entity!(NonConformity, Collection::NonConformity);
impl_entity!(Determination, Collection::Determination);
impl_entity!(Recommendation, Collection::Recommendation);
