//! Named record collections and the generic record shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Field map of a record, excluding its id.
pub type Fields = serde_json::Map<String, Value>;

/// Field holding the sync status of a locally stored record.
pub const SYNC_STATUS_FIELD: &str = "sync_status";
/// Field holding the id a record was minted with while offline.
pub const LOCAL_ID_FIELD: &str = "local_id";

/// A named record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Inspection cases (fiscalizações).
    Case,
    /// Inspected units within a case.
    Unit,
    /// Checklist items (read-only reference mirror).
    ChecklistItem,
    /// Answers to checklist items.
    ChecklistResponse,
    /// Findings entered manually.
    ManualFinding,
    /// Non-conformities.
    NonConformity,
    /// Corrective determinations.
    Determination,
    /// Recommendations.
    Recommendation,
    /// Evidence photos.
    Photo,
    /// Infraction notices.
    InfractionNotice,
}

impl Collection {
    /// Every collection, parents before children.
    pub const ALL: [Collection; 10] = [
        Collection::ChecklistItem,
        Collection::Case,
        Collection::Unit,
        Collection::ChecklistResponse,
        Collection::ManualFinding,
        Collection::NonConformity,
        Collection::Determination,
        Collection::Recommendation,
        Collection::Photo,
        Collection::InfractionNotice,
    ];

    /// Returns the table name used by stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Case => "cases",
            Collection::Unit => "units",
            Collection::ChecklistItem => "checklist_items",
            Collection::ChecklistResponse => "checklist_responses",
            Collection::ManualFinding => "manual_findings",
            Collection::NonConformity => "non_conformities",
            Collection::Determination => "determinations",
            Collection::Recommendation => "recommendations",
            Collection::Photo => "photos",
            Collection::InfractionNotice => "infraction_notices",
        }
    }

    /// Returns true for read-only reference mirrors.
    pub fn is_reference(&self) -> bool {
        matches!(self, Collection::ChecklistItem)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {s}"))
    }
}

/// A stored record: an id plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record id.
    pub id: String,
    /// All other fields.
    pub fields: Fields,
}

impl Record {
    /// Creates a record.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Returns a field, treating `"id"` as the record id.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            Some(Value::String(self.id.clone()))
        } else {
            self.fields.get(name).cloned()
        }
    }

    /// Returns a string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        if name == "id" {
            return Some(&self.id);
        }
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Overwrites the given fields, keeping all others.
    pub fn merge(&mut self, patch: Fields) {
        for (key, value) in patch {
            self.fields.insert(key, value);
        }
    }
}

/// An exact-match predicate over record fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Creates a filter matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a filter with one equality clause.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Adds an equality clause.
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Returns the clauses.
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Returns true if the record satisfies every clause.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| match record.field(field) {
                Some(actual) => &actual == expected,
                None => expected.is_null(),
            })
    }
}

/// Sorts records ascending by `field`, ties broken by id.
pub fn sort_records(records: &mut [Record], field: &str) {
    records.sort_by(|a, b| {
        compare_values(a.field(field).as_ref(), b.field(field).as_ref())
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Orders JSON values: missing/null first, then booleans, numbers, strings.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&y.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, fields: Value) -> Record {
        match fields {
            Value::Object(map) => Record::new(id, map),
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>().unwrap(), collection);
        }
        assert!("nope".parse::<Collection>().is_err());
        assert!(Collection::ChecklistItem.is_reference());
        assert!(!Collection::Unit.is_reference());
    }

    #[test]
    fn filter_matches_fields_and_id() {
        let r = record("r1", json!({"unit_id": "u1", "number": 3}));
        assert!(Filter::eq("unit_id", "u1").matches(&r));
        assert!(Filter::eq("unit_id", "u1").and("number", 3).matches(&r));
        assert!(!Filter::eq("unit_id", "u2").matches(&r));
        assert!(Filter::eq("id", "r1").matches(&r));
        assert!(Filter::eq("missing", Value::Null).matches(&r));
        assert!(Filter::all().matches(&r));
    }

    #[test]
    fn sort_orders_numbers_numerically() {
        let mut records = vec![
            record("a", json!({"created_at": 100})),
            record("b", json!({"created_at": 20})),
            record("c", json!({})),
            record("d", json!({"created_at": 20})),
        ];
        sort_records(&mut records, "created_at");
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn merge_overwrites_only_patched_fields() {
        let mut r = record("r1", json!({"a": 1, "b": 2}));
        let patch = match json!({"b": 3, "c": 4}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        r.merge(patch);
        assert_eq!(r.field("a"), Some(json!(1)));
        assert_eq!(r.field("b"), Some(json!(3)));
        assert_eq!(r.field("c"), Some(json!(4)));
    }
}
