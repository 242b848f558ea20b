//! Loading a unit's records and relating them to each other.

use crate::collection::Filter;
use crate::engine::Ctx;
use crate::entity::{
    ChecklistResponse, Determination, ManualFinding, NonConformity, Photo, Recommendation,
    SourceKind, SourceRecord, Unit,
};
use crate::error::CoreResult;
use crate::store::EntityStore;
use crate::text::legacy_prefix;
use std::collections::{HashMap, HashSet};

/// How a non-conformity relates to the response or finding it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLink {
    /// `source_id` names a record of this unit.
    Explicit {
        /// Source collection.
        kind: SourceKind,
        /// Source id.
        id: String,
    },
    /// No `source_id`; exactly one source's text prefix occurs in the
    /// description.
    Legacy {
        /// Source collection.
        kind: SourceKind,
        /// Source id.
        id: String,
    },
    /// No `source_id` and several sources match by text. Never trusted.
    Ambiguous {
        /// Ids of every matching source.
        candidates: Vec<String>,
    },
    /// `source_id` names no record of this unit, or nothing matches by text.
    Unresolved {
        /// The stored `source_id`, if any.
        source_id: Option<String>,
    },
}

impl SourceLink {
    /// Returns the linked source id, for explicit and unique legacy links.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            SourceLink::Explicit { id, .. } | SourceLink::Legacy { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Every record owned by one unit, in walk order.
#[derive(Debug, Clone)]
pub struct UnitRecords {
    /// The unit.
    pub unit: Unit,
    /// Checklist responses by creation time.
    pub responses: Vec<ChecklistResponse>,
    /// Manual findings by `ordem`, then creation time.
    pub findings: Vec<ManualFinding>,
    /// Non-conformities by number.
    pub non_conformities: Vec<NonConformity>,
    /// Determinations by number.
    pub determinations: Vec<Determination>,
    /// Recommendations by creation time.
    pub recommendations: Vec<Recommendation>,
    /// Evidence photos.
    pub photos: Vec<Photo>,
}

impl UnitRecords {
    pub(crate) fn load<S: EntityStore + ?Sized>(ctx: Ctx<'_, S>, unit: Unit) -> CoreResult<Self> {
        let in_unit = Filter::eq("unit_id", unit.id.as_str());
        let mut findings: Vec<ManualFinding> = ctx.list(&in_unit, "ordem")?;
        findings.sort_by(|a, b| {
            a.ordem
                .cmp(&b.ordem)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(Self {
            responses: ctx.list(&in_unit, "created_at")?,
            findings,
            non_conformities: ctx.list(&in_unit, "number")?,
            determinations: ctx.list(&in_unit, "number")?,
            recommendations: ctx.list(&in_unit, "created_at")?,
            photos: ctx.list(&in_unit, "created_at")?,
            unit,
        })
    }

    /// Returns the unit's responses and manual findings in walk order.
    ///
    /// Responses keep their creation order and findings their `ordem`
    /// order; the two lists are merged by creation time, so a record
    /// appended to the unit is walked last.
    pub fn sources(&self) -> Vec<SourceRecord> {
        let mut out = Vec::with_capacity(self.responses.len() + self.findings.len());
        let mut responses = self.responses.iter().peekable();
        let mut findings = self.findings.iter().peekable();
        loop {
            let take_response = match (responses.peek(), findings.peek()) {
                (Some(r), Some(f)) => r.created_at <= f.created_at,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_response {
                if let Some(r) = responses.next() {
                    out.push(SourceRecord::Response(r.clone()));
                }
            } else if let Some(f) = findings.next() {
                out.push(SourceRecord::Finding(f.clone()));
            }
        }
        out
    }

    /// Finds a source of this unit by id.
    pub fn source(&self, id: &str) -> Option<SourceRecord> {
        self.responses
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(SourceRecord::Response)
            .or_else(|| {
                self.findings
                    .iter()
                    .find(|f| f.id == id)
                    .cloned()
                    .map(SourceRecord::Finding)
            })
    }

    /// Resolves the source of every non-conformity, keyed by NC id.
    ///
    /// Explicit `source_id` references win. Records without one are related
    /// by the leading `prefix_len` characters of a source's text occurring in
    /// the description; sources already claimed explicitly are not
    /// candidates.
    pub fn resolve_links(&self, prefix_len: usize) -> HashMap<String, SourceLink> {
        let claimed: HashSet<&str> = self
            .non_conformities
            .iter()
            .filter_map(|nc| nc.source_id.as_deref())
            .collect();

        let mut links = HashMap::with_capacity(self.non_conformities.len());
        for nc in &self.non_conformities {
            let link = match &nc.source_id {
                Some(id) => match self.source(id) {
                    Some(source) => SourceLink::Explicit {
                        kind: source.kind(),
                        id: id.clone(),
                    },
                    None => SourceLink::Unresolved {
                        source_id: Some(id.clone()),
                    },
                },
                None => self.match_legacy(nc, prefix_len, &claimed),
            };
            links.insert(nc.id.clone(), link);
        }
        links
    }

    fn match_legacy(
        &self,
        nc: &NonConformity,
        prefix_len: usize,
        claimed: &HashSet<&str>,
    ) -> SourceLink {
        let candidates = self
            .responses
            .iter()
            .map(|r| (SourceKind::Response, r.id.as_str(), r.note.as_str()))
            .chain(
                self.findings
                    .iter()
                    .map(|f| (SourceKind::ManualFinding, f.id.as_str(), f.text.as_str())),
            );
        let matches: Vec<(SourceKind, &str)> = candidates
            .filter(|(_, id, text)| {
                let prefix = legacy_prefix(text, prefix_len);
                !prefix.is_empty() && !claimed.contains(id) && nc.description.contains(prefix)
            })
            .map(|(kind, id, _)| (kind, id))
            .collect();

        match matches.as_slice() {
            [] => SourceLink::Unresolved { source_id: None },
            [(kind, id)] => SourceLink::Legacy {
                kind: *kind,
                id: (*id).to_string(),
            },
            many => SourceLink::Ambiguous {
                candidates: many.iter().map(|(_, id)| (*id).to_string()).collect(),
            },
        }
    }

    /// Returns the non-conformities linked to a source, by number.
    pub fn linked_to<'r>(
        &'r self,
        links: &HashMap<String, SourceLink>,
        source_id: &str,
    ) -> Vec<&'r NonConformity> {
        self.non_conformities
            .iter()
            .filter(|nc| links.get(&nc.id).and_then(SourceLink::source_id) == Some(source_id))
            .collect()
    }

    /// Returns the ids of ambiguous links naming a source as a candidate.
    pub fn ambiguous_for(&self, links: &HashMap<String, SourceLink>, source_id: &str) -> Vec<String> {
        self.non_conformities
            .iter()
            .filter(|nc| {
                matches!(links.get(&nc.id), Some(SourceLink::Ambiguous { candidates })
                    if candidates.iter().any(|c| c == source_id))
            })
            .map(|nc| nc.id.clone())
            .collect()
    }

    /// Returns the determinations attached to a non-conformity, by number.
    pub fn determinations_of(&self, nc_id: &str) -> Vec<&Determination> {
        self.determinations
            .iter()
            .filter(|d| d.non_conformity_id == nc_id)
            .collect()
    }
}
