//! Cases, units and their reference/evidence records.

use super::impl_entity;
use crate::collection::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inspection case (fiscalização). Number sequences are scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Case title.
    pub title: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// An inspected unit inside a case.
///
/// Units are ordered by `created_at`; that order drives cross-unit
/// numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning case.
    pub case_id: String,
    /// Display name.
    pub name: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// A checklist question mirrored from the reference tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Question text.
    pub question: String,
    /// Legal article a negative answer violates.
    pub article: String,
    /// Whether a negative answer raises a non-conformity.
    pub produces_non_conformity: bool,
    /// Corrective text for the determination, if any.
    #[serde(default)]
    pub determination_template: Option<String>,
    /// Text for a recommendation raised by a negative answer, if any.
    #[serde(default)]
    pub recommendation_template: Option<String>,
}

/// An evidence photo attached to a unit, optionally to one of its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Owning unit.
    pub unit_id: String,
    /// Response or finding the photo documents.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Where the image lives.
    pub uri: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// An infraction notice (auto de infração), numbered per calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfractionNotice {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Case the notice was issued in.
    pub case_id: String,
    /// Calendar year the sequence belongs to.
    pub year: i32,
    /// Position within the year.
    pub number: u32,
    /// Issue time.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub issued_at: DateTime<Utc>,
}

impl InfractionNotice {
    /// Returns the display number, e.g. `AI nº 007/2024/DSB/AGEMS`.
    pub fn label(&self) -> String {
        crate::numbering::format_infraction_number(self.number, self.year)
    }
}

impl_entity!(Case, Collection::Case);
impl_entity!(Unit, Collection::Unit);
impl_entity!(ChecklistItem, Collection::ChecklistItem);
impl_entity!(Photo, Collection::Photo);
impl_entity!(InfractionNotice, Collection::InfractionNotice);
