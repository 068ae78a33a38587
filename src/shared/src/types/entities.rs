//! Extracted-entity types.
//!
//! Entities are a tagged union per kind so consumers match exhaustively
//! instead of reading loosely-typed records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The entity classes the resolver extracts from query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Equipment,
    System,
    Parameter,
    EquipmentType,
    Location,
    Status,
    Department,
    TimePeriod,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Equipment => "equipment",
            EntityKind::System => "system",
            EntityKind::Parameter => "parameter",
            EntityKind::EquipmentType => "equipment_type",
            EntityKind::Location => "location",
            EntityKind::Status => "status",
            EntityKind::Department => "department",
            EntityKind::TimePeriod => "time_period",
        }
    }
}

/// Character span of a match in the original query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
}

impl EntitySpan {
    pub fn overlaps(&self, other: &EntitySpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A resolved entity value, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedValue {
    Equipment {
        equipment_id: String,
    },
    System {
        system_id: String,
    },
    Parameter {
        parameter_id: String,
    },
    EquipmentType {
        type_code: i32,
        canonical: String,
    },
    Location {
        canonical: String,
    },
    Status {
        canonical: String,
    },
    Department {
        canonical: String,
    },
    TimePeriod {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        label: String,
    },
}

impl ResolvedValue {
    pub fn kind(&self) -> EntityKind {
        match self {
            ResolvedValue::Equipment { .. } => EntityKind::Equipment,
            ResolvedValue::System { .. } => EntityKind::System,
            ResolvedValue::Parameter { .. } => EntityKind::Parameter,
            ResolvedValue::EquipmentType { .. } => EntityKind::EquipmentType,
            ResolvedValue::Location { .. } => EntityKind::Location,
            ResolvedValue::Status { .. } => EntityKind::Status,
            ResolvedValue::Department { .. } => EntityKind::Department,
            ResolvedValue::TimePeriod { .. } => EntityKind::TimePeriod,
        }
    }

    /// Canonical display text, used when embedding the value in prompts
    /// and summaries.
    pub fn display(&self) -> String {
        match self {
            ResolvedValue::Equipment { equipment_id } => equipment_id.clone(),
            ResolvedValue::System { system_id } => system_id.clone(),
            ResolvedValue::Parameter { parameter_id } => parameter_id.clone(),
            ResolvedValue::EquipmentType { canonical, .. } => canonical.clone(),
            ResolvedValue::Location { canonical } => canonical.clone(),
            ResolvedValue::Status { canonical } => canonical.clone(),
            ResolvedValue::Department { canonical } => canonical.clone(),
            ResolvedValue::TimePeriod { label, .. } => label.clone(),
        }
    }
}

/// One accepted entity match. Confidence 1.0 means an exact reference
/// hit; fuzzy matches score lower as edit distance grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResolution {
    pub original: String,
    pub resolved: ResolvedValue,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
    pub span: EntitySpan,
}

/// A substring that matched a pattern but could not be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedEntity {
    pub original: String,
    pub kind: EntityKind,
    pub span: EntitySpan,
}

/// Full extraction outcome for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityExtraction {
    pub entities: Vec<EntityResolution>,
    pub unresolved: Vec<UnresolvedEntity>,
    /// resolved / (resolved + unresolved); 1.0 when nothing matched at all.
    pub confidence: f32,
    pub suggestions: Vec<String>,
}

impl EntityExtraction {
    pub fn empty() -> Self {
        EntityExtraction {
            entities: Vec::new(),
            unresolved: Vec::new(),
            confidence: 1.0,
            suggestions: Vec::new(),
        }
    }

    /// First resolution of the given kind, if any.
    pub fn first_of(&self, kind: EntityKind) -> Option<&EntityResolution> {
        self.entities.iter().find(|e| e.resolved.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_detection() {
        let a = EntitySpan { start: 0, end: 6 };
        let b = EntitySpan { start: 4, end: 10 };
        let c = EntitySpan { start: 6, end: 12 };
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn resolved_value_tagging() {
        let value = ResolvedValue::Equipment {
            equipment_id: "HX-101".to_string(),
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "equipment");
        assert_eq!(json["equipment_id"], "HX-101");
        assert_eq!(value.kind(), EntityKind::Equipment);
        assert_eq!(value.display(), "HX-101");
    }

    #[test]
    fn first_of_picks_matching_kind() {
        let extraction = EntityExtraction {
            entities: vec![
                EntityResolution {
                    original: "SYS-001".to_string(),
                    resolved: ResolvedValue::System {
                        system_id: "SYS-001".to_string(),
                    },
                    confidence: 1.0,
                    alternatives: vec![],
                    span: EntitySpan { start: 0, end: 7 },
                },
                EntityResolution {
                    original: "HX-101".to_string(),
                    resolved: ResolvedValue::Equipment {
                        equipment_id: "HX-101".to_string(),
                    },
                    confidence: 1.0,
                    alternatives: vec![],
                    span: EntitySpan { start: 10, end: 16 },
                },
            ],
            unresolved: vec![],
            confidence: 1.0,
            suggestions: vec![],
        };

        let hit = extraction.first_of(EntityKind::Equipment).unwrap();
        assert_eq!(hit.original, "HX-101");
        assert!(extraction.first_of(EntityKind::Department).is_none());
    }
}
