//! Few-shot example selection.
//!
//! A fixed bilingual bank of question/SQL pairs. For each incoming query
//! the bank scores every example on token overlap with the question,
//! category agreement with the detected intent, keyword hits, and table
//! overlap with the context's focus tables, then returns the top-k for the
//! generation prompt.

use cmms_shared::QueryIntent;
use std::collections::HashSet;

/// Scoring weights, highest-leverage signal first.
const TOKEN_WEIGHT: f32 = 3.0;
const CATEGORY_WEIGHT: f32 = 2.0;
const KEYWORD_WEIGHT: f32 = 0.5;
const TABLE_WEIGHT: f32 = 1.5;

pub struct FewShotExample {
    pub question: &'static str,
    pub sql: &'static str,
    pub category: QueryIntent,
    pub keywords: &'static [&'static str],
    pub tables: &'static [&'static str],
}

static EXAMPLES: &[FewShotExample] = &[
    FewShotExample {
        question: "What is the status of HX-101?",
        sql: "SELECT equipment_id, equipment_name, status, location FROM equipment WHERE equipment_id = 'HX-101'",
        category: QueryIntent::EquipmentStatus,
        keywords: &["status", "状態"],
        tables: &["equipment"],
    },
    FewShotExample {
        question: "稼働中の設備を教えて",
        sql: "SELECT equipment_id, equipment_name, status, location FROM equipment WHERE status = 'running' ORDER BY equipment_id LIMIT 100",
        category: QueryIntent::EquipmentStatus,
        keywords: &["稼働", "running"],
        tables: &["equipment"],
    },
    FewShotExample {
        question: "List all pumps",
        sql: "SELECT e.equipment_id, e.equipment_name, e.status, e.location FROM equipment e JOIN equipment_type_master t ON t.equipment_type_id = e.equipment_type_id WHERE t.type_name = 'Pump' ORDER BY e.equipment_id LIMIT 100",
        category: QueryIntent::EquipmentList,
        keywords: &["list", "pump", "ポンプ", "一覧"],
        tables: &["equipment", "equipment_type_master"],
    },
    FewShotExample {
        question: "Show maintenance history for HX-101 in the last month",
        sql: "SELECT h.work_date, h.work_type, h.work_description, h.technician, h.cost FROM maintenance_history h WHERE h.equipment_id = 'HX-101' AND h.work_date >= date_trunc('month', CURRENT_DATE - interval '1 month') AND h.work_date < date_trunc('month', CURRENT_DATE) ORDER BY h.work_date DESC LIMIT 100",
        category: QueryIntent::MaintenanceHistory,
        keywords: &["history", "maintenance", "last month"],
        tables: &["maintenance_history", "equipment"],
    },
    FewShotExample {
        question: "先月の保全履歴を見せて",
        sql: "SELECT h.equipment_id, h.work_date, h.work_type, h.work_description FROM maintenance_history h WHERE h.work_date >= date_trunc('month', CURRENT_DATE - interval '1 month') AND h.work_date < date_trunc('month', CURRENT_DATE) ORDER BY h.work_date DESC LIMIT 100",
        category: QueryIntent::MaintenanceHistory,
        keywords: &["保全履歴", "先月", "履歴"],
        tables: &["maintenance_history"],
    },
    FewShotExample {
        question: "What maintenance is scheduled in the next 30 days?",
        sql: "SELECT s.equipment_id, e.equipment_name, s.scheduled_date, s.work_type, s.priority, s.assigned_to FROM maintenance_schedule s JOIN equipment e ON e.equipment_id = s.equipment_id WHERE s.scheduled_date BETWEEN CURRENT_DATE AND CURRENT_DATE + 30 AND s.status IN ('planned', 'in_progress', 'overdue') ORDER BY s.scheduled_date LIMIT 100",
        category: QueryIntent::MaintenanceSchedule,
        keywords: &["scheduled", "upcoming", "予定"],
        tables: &["maintenance_schedule", "equipment"],
    },
    FewShotExample {
        question: "Which equipment has the highest risk score?",
        sql: "SELECT r.equipment_id, e.equipment_name, r.risk_score, r.risk_level, r.risk_factors FROM equipment_risk_assessment r JOIN equipment e ON e.equipment_id = r.equipment_id ORDER BY r.risk_score DESC LIMIT 10",
        category: QueryIntent::RiskAssessment,
        keywords: &["risk", "highest"],
        tables: &["equipment_risk_assessment", "equipment"],
    },
    FewShotExample {
        question: "リスクが高い設備は？",
        sql: "SELECT r.equipment_id, e.equipment_name, r.risk_score, r.risk_level FROM equipment_risk_assessment r JOIN equipment e ON e.equipment_id = r.equipment_id WHERE r.risk_level IN ('high', 'critical') ORDER BY r.risk_score DESC LIMIT 100",
        category: QueryIntent::RiskAssessment,
        keywords: &["リスク", "危険"],
        tables: &["equipment_risk_assessment", "equipment"],
    },
    FewShotExample {
        question: "Show the latest temperature readings for TI-101-01",
        sql: "SELECT d.parameter_id, p.parameter_name, d.measured_at, d.value, p.unit FROM process_data d JOIN parameter_master p ON p.parameter_id = d.parameter_id WHERE d.parameter_id = 'TI-101-01' ORDER BY d.measured_at DESC LIMIT 100",
        category: QueryIntent::ParameterMonitoring,
        keywords: &["temperature", "reading", "latest"],
        tables: &["process_data", "parameter_master"],
    },
    FewShotExample {
        question: "TI-101-01の温度トレンドを見たい",
        sql: "SELECT d.measured_at, d.value, p.unit, p.normal_min, p.normal_max FROM process_data d JOIN parameter_master p ON p.parameter_id = d.parameter_id WHERE d.parameter_id = 'TI-101-01' ORDER BY d.measured_at DESC LIMIT 100",
        category: QueryIntent::ParameterMonitoring,
        keywords: &["温度", "トレンド"],
        tables: &["process_data", "parameter_master"],
    },
];

pub struct ExampleBank;

impl ExampleBank {
    pub fn new() -> Self {
        ExampleBank
    }

    /// Number of examples in the bank.
    pub fn len(&self) -> usize {
        EXAMPLES.len()
    }

    pub fn is_empty(&self) -> bool {
        EXAMPLES.is_empty()
    }

    /// Top-k examples for this query, best first. Ties keep bank order.
    pub fn select(
        &self,
        query: &str,
        intent: QueryIntent,
        focus_tables: &[&str],
        k: usize,
    ) -> Vec<&'static FewShotExample> {
        let lower = query.to_lowercase();
        let query_tokens = tokenize(&lower);

        let mut scored: Vec<(&'static FewShotExample, f32)> = EXAMPLES
            .iter()
            .map(|example| {
                let score = score_example(example, &lower, &query_tokens, intent, focus_tables);
                (example, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(e, _)| e).collect()
    }

    /// Render selected examples as the prompt's example section.
    pub fn render(examples: &[&FewShotExample]) -> String {
        let mut out = String::new();
        for example in examples {
            out.push_str("Q: ");
            out.push_str(example.question);
            out.push_str("\nSQL: ");
            out.push_str(example.sql);
            out.push_str("\n\n");
        }
        out
    }
}

impl Default for ExampleBank {
    fn default() -> Self {
        Self::new()
    }
}

fn score_example(
    example: &FewShotExample,
    query_lower: &str,
    query_tokens: &HashSet<String>,
    intent: QueryIntent,
    focus_tables: &[&str],
) -> f32 {
    let example_tokens = tokenize(&example.question.to_lowercase());
    let token_overlap = jaccard(query_tokens, &example_tokens);

    let category = if example.category == intent { 1.0 } else { 0.0 };

    let keyword_hits = example
        .keywords
        .iter()
        .filter(|k| query_lower.contains(&k.to_lowercase()))
        .count();
    let keyword_overlap = if example.keywords.is_empty() {
        0.0
    } else {
        keyword_hits as f32 / example.keywords.len() as f32
    };

    let table_hits = example
        .tables
        .iter()
        .filter(|t| focus_tables.contains(*t))
        .count();
    let table_overlap = if example.tables.is_empty() {
        0.0
    } else {
        table_hits as f32 / example.tables.len() as f32
    };

    TOKEN_WEIGHT * token_overlap
        + CATEGORY_WEIGHT * category
        + KEYWORD_WEIGHT * keyword_overlap
        + TABLE_WEIGHT * table_overlap
}

/// ASCII alphanumeric runs become one token each; every CJK character is
/// its own token since Japanese text carries no spaces.
fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            current.push(c);
        } else {
            if !current.is_empty() {
                tokens.insert(std::mem::take(&mut current));
            }
            if !c.is_ascii() && !c.is_whitespace() {
                tokens.insert(c.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_question_ranks_first() {
        let bank = ExampleBank::new();
        let selected = bank.select(
            "What is the status of HX-101?",
            QueryIntent::EquipmentStatus,
            &["equipment"],
            3,
        );
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].question, "What is the status of HX-101?");
    }

    #[test]
    fn test_category_outweighs_stray_tokens() {
        let bank = ExampleBank::new();
        // Few shared tokens with any example, so category must decide.
        let selected = bank.select(
            "rpn ranking please",
            QueryIntent::RiskAssessment,
            &["equipment_risk_assessment", "equipment"],
            2,
        );
        assert_eq!(selected[0].category, QueryIntent::RiskAssessment);
        assert_eq!(selected[1].category, QueryIntent::RiskAssessment);
    }

    #[test]
    fn test_japanese_query_prefers_japanese_example() {
        let bank = ExampleBank::new();
        let selected = bank.select(
            "先月の保全履歴は？",
            QueryIntent::MaintenanceHistory,
            &["maintenance_history", "equipment"],
            2,
        );
        assert_eq!(selected[0].question, "先月の保全履歴を見せて");
    }

    #[test]
    fn test_k_caps_selection() {
        let bank = ExampleBank::new();
        let selected = bank.select("status", QueryIntent::EquipmentStatus, &[], 1);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_render_produces_question_sql_pairs() {
        let bank = ExampleBank::new();
        let selected = bank.select(
            "list all pumps",
            QueryIntent::EquipmentList,
            &["equipment", "equipment_type_master"],
            2,
        );
        let rendered = ExampleBank::render(&selected);
        assert!(rendered.contains("Q: List all pumps"));
        assert!(rendered.contains("SQL: SELECT"));
    }

    #[test]
    fn test_tokenizer_mixed_text() {
        let tokens = tokenize("hx-101の状態");
        assert!(tokens.contains("hx"));
        assert!(tokens.contains("101"));
        assert!(tokens.contains("の"));
        assert!(tokens.contains("状"));
        assert!(!tokens.contains("-"));
    }
}
