//! Typed domain records.
//!
//! Every type here maps onto one [`Collection`] through the [`Entity`]
//! trait. Stores only see [`Record`]s; conversion goes through serde.

/// Implements [`Entity`] for a struct with an `id: String` field.
macro_rules! impl_entity {
    ($ty:ty, $collection:expr) => {
        impl $crate::entity::Entity for $ty {
            const COLLECTION: $crate::collection::Collection = $collection;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}
pub(crate) use impl_entity;

mod finding;
mod inspection;

pub use finding::{
    Answer, ChecklistResponse, Determination, DeterminationStatus, ManualFinding,
    NonConformity, Recommendation, RecommendationOrigin, SourceKind, SourceRecord,
};
pub use inspection::{Case, ChecklistItem, InfractionNotice, Photo, Unit};

use crate::collection::{Collection, Fields, Record};
use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a locally stored record has been confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The server holds this version.
    Synced,
    /// Written while offline, waiting in the sync queue.
    Pending,
}

/// A typed record stored in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    /// The collection holding this type.
    const COLLECTION: Collection;

    /// Returns the record id. Empty for records not yet stored.
    fn id(&self) -> &str;

    /// Converts to a field map, without the id.
    fn to_fields(&self) -> CoreResult<Fields> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            other => Err(CoreError::integrity(format!(
                "{} serialized to a non-object: {other}",
                Self::COLLECTION
            ))),
        }
    }

    /// Builds the typed value from a stored record.
    fn from_record(record: &Record) -> CoreResult<Self> {
        let mut map = record.fields.clone();
        map.insert("id".into(), Value::String(record.id.clone()));
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn entity_fields_exclude_id() {
        let unit = Unit {
            id: "u1".into(),
            case_id: "c1".into(),
            name: "ETA Norte".into(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };
        let fields = unit.to_fields().unwrap();
        assert!(!fields.contains_key("id"));
        assert_eq!(fields.get("case_id").unwrap(), "c1");
        // Timestamps are stored as integer microseconds so they sort numerically.
        assert!(fields.get("created_at").unwrap().is_i64());

        let back = Unit::from_record(&Record::new("u1", fields)).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn from_record_ignores_store_metadata() {
        let unit = Unit {
            id: String::new(),
            case_id: "c1".into(),
            name: "Reservatório".into(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };
        let mut fields = unit.to_fields().unwrap();
        fields.insert(crate::collection::SYNC_STATUS_FIELD.into(), "pending".into());
        fields.insert(crate::collection::LOCAL_ID_FIELD.into(), "local-1".into());

        let back = Unit::from_record(&Record::new("local-1", fields)).unwrap();
        assert_eq!(back.id, "local-1");
        assert_eq!(back.name, "Reservatório");
    }
}
