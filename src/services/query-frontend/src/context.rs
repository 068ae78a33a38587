//! Prompt grounding context.
//!
//! Builds the schema and vocabulary block the SQL generator feeds the
//! model, narrowed to the tables an intent actually touches, plus hints
//! describing what the entity resolver found. The context confidence feeds
//! the orchestrator's overall score.

use cmms_database::SchemaCatalog;
use cmms_shared::{EntityExtraction, QueryIntent};

/// Everything the generator needs to ground one query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub schema_text: String,
    pub vocabulary: &'static str,
    /// Tables this intent usually reads, used for few-shot scoring and
    /// prompt emphasis. Empty means no narrowing.
    pub focus_tables: Vec<&'static str>,
    pub entity_hints: Vec<String>,
    pub confidence: f32,
}

pub struct ContextBuilder {
    catalog: SchemaCatalog,
}

impl ContextBuilder {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn build(&self, intent: QueryIntent, extraction: &EntityExtraction) -> QueryContext {
        let focus_tables = focus_tables_for(intent);

        let mut entity_hints = Vec::new();
        for entity in &extraction.entities {
            let hint = if entity.confidence >= 1.0 {
                format!(
                    "{} {} referenced directly",
                    entity.resolved.kind().as_str(),
                    entity.resolved.display()
                )
            } else {
                format!(
                    "'{}' resolved to {} {} (similarity {:.2})",
                    entity.original,
                    entity.resolved.kind().as_str(),
                    entity.resolved.display(),
                    entity.confidence
                )
            };
            entity_hints.push(hint);
        }
        for miss in &extraction.unresolved {
            entity_hints.push(format!(
                "'{}' looks like a {} but matches no known id",
                miss.original,
                miss.kind.as_str()
            ));
        }

        let has_entities = !extraction.entities.is_empty() || !extraction.unresolved.is_empty();
        let entity_factor = if has_entities {
            extraction.confidence
        } else {
            0.0
        };
        let intent_factor = if intent == QueryIntent::Unknown { 0.0 } else { 0.3 };
        let confidence = (0.4 + intent_factor + 0.3 * entity_factor).clamp(0.0, 1.0);

        QueryContext {
            schema_text: self.catalog.schema_context_text(),
            vocabulary: self.catalog.business_vocabulary(),
            focus_tables,
            entity_hints,
            confidence,
        }
    }

    /// Render the grounding block placed in the generation prompt.
    pub fn grounding_block(&self, context: &QueryContext) -> String {
        let mut out = String::new();
        out.push_str(&context.schema_text);
        out.push('\n');
        out.push_str(context.vocabulary);
        if !context.focus_tables.is_empty() {
            out.push_str("\nMost relevant tables for this question: ");
            out.push_str(&context.focus_tables.join(", "));
            out.push('\n');
        }
        if !context.entity_hints.is_empty() {
            out.push_str("\nResolved references:\n");
            for hint in &context.entity_hints {
                out.push_str("- ");
                out.push_str(hint);
                out.push('\n');
            }
        }
        out
    }
}

fn focus_tables_for(intent: QueryIntent) -> Vec<&'static str> {
    match intent {
        QueryIntent::EquipmentStatus => vec!["equipment"],
        QueryIntent::EquipmentList => vec!["equipment", "equipment_type_master"],
        QueryIntent::MaintenanceHistory => vec!["maintenance_history", "equipment"],
        QueryIntent::MaintenanceSchedule => vec!["maintenance_schedule", "equipment"],
        QueryIntent::RiskAssessment => vec!["equipment_risk_assessment", "equipment"],
        QueryIntent::ParameterMonitoring => vec!["process_data", "parameter_master"],
        QueryIntent::Unknown | QueryIntent::Error => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmms_shared::{EntityResolution, EntitySpan, ResolvedValue, UnresolvedEntity};

    fn builder() -> ContextBuilder {
        ContextBuilder::new(SchemaCatalog::new())
    }

    fn equipment_entity(confidence: f32) -> EntityResolution {
        EntityResolution {
            original: "HX-101".to_string(),
            resolved: ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string(),
            },
            confidence,
            alternatives: vec![],
            span: EntitySpan { start: 0, end: 6 },
        }
    }

    #[test]
    fn test_focus_tables_follow_intent() {
        let extraction = EntityExtraction::empty();
        let history = builder().build(QueryIntent::MaintenanceHistory, &extraction);
        assert_eq!(history.focus_tables, vec!["maintenance_history", "equipment"]);

        let monitoring = builder().build(QueryIntent::ParameterMonitoring, &extraction);
        assert!(monitoring.focus_tables.contains(&"process_data"));

        let unknown = builder().build(QueryIntent::Unknown, &extraction);
        assert!(unknown.focus_tables.is_empty());
    }

    #[test]
    fn test_confidence_rewards_grounding() {
        let mut extraction = EntityExtraction::empty();
        extraction.entities.push(equipment_entity(1.0));

        let grounded = builder().build(QueryIntent::EquipmentStatus, &extraction);
        assert!((grounded.confidence - 1.0).abs() < f32::EPSILON);

        let no_entities = builder().build(QueryIntent::EquipmentStatus, &EntityExtraction::empty());
        assert!((no_entities.confidence - 0.7).abs() < f32::EPSILON);

        let nothing = builder().build(QueryIntent::Unknown, &EntityExtraction::empty());
        assert!((nothing.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_hints_describe_fuzzy_and_unresolved() {
        let mut extraction = EntityExtraction::empty();
        extraction.entities.push(EntityResolution {
            original: "HX-109".to_string(),
            resolved: ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string(),
            },
            confidence: 0.83,
            alternatives: vec![],
            span: EntitySpan { start: 0, end: 6 },
        });
        extraction.unresolved.push(UnresolvedEntity {
            original: "ZZ-999".to_string(),
            kind: cmms_shared::EntityKind::Equipment,
            span: EntitySpan { start: 10, end: 16 },
        });
        extraction.confidence = 0.5;

        let context = builder().build(QueryIntent::EquipmentStatus, &extraction);
        assert_eq!(context.entity_hints.len(), 2);
        assert!(context.entity_hints[0].contains("HX-109"));
        assert!(context.entity_hints[0].contains("similarity"));
        assert!(context.entity_hints[1].contains("ZZ-999"));

        let block = builder().grounding_block(&context);
        assert!(block.contains("Resolved references"));
        assert!(block.contains("equipment"));
    }

    #[test]
    fn test_grounding_block_contains_schema_and_vocabulary() {
        let context = builder().build(QueryIntent::RiskAssessment, &EntityExtraction::empty());
        let block = builder().grounding_block(&context);
        assert!(block.contains("equipment_risk_assessment"));
        assert!(block.contains("Business vocabulary"));
        assert!(block.contains("Most relevant tables"));
    }
}
