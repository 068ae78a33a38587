//! Intent detection.
//!
//! Weighted bilingual keyword scoring. Each intent carries a keyword table;
//! the score of an intent is the weight sum of its matched keywords, and
//! confidence combines the winner's share of all matched weight with the
//! absolute strength of the match. Queries with no keyword hits come back
//! as `Unknown` with zero confidence so the caller routes them to the full
//! generation pipeline.

use cmms_shared::{Language, QueryIntent};

/// (keyword, weight). ASCII keywords match on word boundaries; Japanese
/// keywords match as substrings.
type KeywordTable = &'static [(&'static str, f32)];

const STATUS_KEYWORDS: KeywordTable = &[
    ("status", 2.0),
    ("state", 1.0),
    ("condition", 1.5),
    ("running", 1.0),
    ("stopped", 1.0),
    ("operating", 1.0),
    ("状態", 2.0),
    ("稼働", 1.5),
    ("運転状況", 2.0),
    ("停止", 1.0),
];

const LIST_KEYWORDS: KeywordTable = &[
    ("list", 1.5),
    ("show all", 2.0),
    ("all", 1.0),
    ("inventory", 1.5),
    ("equipment in", 1.5),
    ("一覧", 2.0),
    ("リスト", 1.5),
    ("全設備", 2.0),
    ("すべて", 1.0),
];

const HISTORY_KEYWORDS: KeywordTable = &[
    ("maintenance history", 2.5),
    ("history", 1.5),
    ("repair", 1.0),
    ("repaired", 1.0),
    ("overhaul", 1.0),
    ("maintenance", 1.0),
    ("保全履歴", 2.5),
    ("履歴", 1.5),
    ("修理", 1.0),
    ("メンテナンス", 1.0),
    ("オーバーホール", 1.0),
];

const SCHEDULE_KEYWORDS: KeywordTable = &[
    ("schedule", 2.0),
    ("scheduled", 2.0),
    ("upcoming", 1.5),
    ("planned", 1.5),
    ("next maintenance", 2.5),
    ("due", 1.0),
    ("予定", 2.0),
    ("計画", 1.5),
    ("スケジュール", 2.0),
    ("次回", 1.5),
];

const RISK_KEYWORDS: KeywordTable = &[
    ("risk", 2.0),
    ("rpn", 2.0),
    ("assessment", 1.5),
    ("dangerous", 1.5),
    ("critical", 1.0),
    ("リスク", 2.0),
    ("危険", 1.5),
    ("評価", 1.5),
];

const PARAMETER_KEYWORDS: KeywordTable = &[
    ("temperature", 1.5),
    ("pressure", 1.5),
    ("vibration", 1.5),
    ("flow", 1.0),
    ("trend", 1.5),
    ("reading", 1.5),
    ("sensor", 1.5),
    ("parameter", 1.5),
    ("温度", 1.5),
    ("圧力", 1.5),
    ("振動", 1.5),
    ("流量", 1.5),
    ("トレンド", 1.5),
    ("センサ", 1.5),
    ("パラメータ", 1.5),
    ("計測", 1.0),
];

const INTENT_TABLES: &[(QueryIntent, KeywordTable)] = &[
    (QueryIntent::EquipmentStatus, STATUS_KEYWORDS),
    (QueryIntent::EquipmentList, LIST_KEYWORDS),
    (QueryIntent::MaintenanceHistory, HISTORY_KEYWORDS),
    (QueryIntent::MaintenanceSchedule, SCHEDULE_KEYWORDS),
    (QueryIntent::RiskAssessment, RISK_KEYWORDS),
    (QueryIntent::ParameterMonitoring, PARAMETER_KEYWORDS),
];

/// Detection outcome: the winning intent, a `[0, 1]` confidence, and the
/// keywords that carried the decision.
#[derive(Debug, Clone)]
pub struct IntentDetection {
    pub intent: QueryIntent,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
}

impl IntentDetection {
    fn unknown() -> Self {
        Self {
            intent: QueryIntent::Unknown,
            confidence: 0.0,
            matched_keywords: Vec::new(),
        }
    }
}

pub struct IntentDetector;

impl IntentDetector {
    pub fn new() -> Self {
        IntentDetector
    }

    pub fn detect(&self, query: &str) -> IntentDetection {
        let lower = query.to_lowercase();

        let mut best: Option<(QueryIntent, f32, Vec<String>)> = None;
        let mut total_weight = 0.0f32;
        for (intent, table) in INTENT_TABLES {
            let mut score = 0.0f32;
            let mut matched = Vec::new();
            for (keyword, weight) in table.iter() {
                if keyword_in(&lower, keyword) {
                    score += weight;
                    matched.push((*keyword).to_string());
                }
            }
            total_weight += score;
            let better = match &best {
                Some((_, best_score, _)) => score > *best_score,
                None => score > 0.0,
            };
            if better {
                best = Some((*intent, score, matched));
            }
        }

        match best {
            Some((intent, score, matched)) if score > 0.0 => {
                let share = score / total_weight;
                let strength = 1.0 - 0.5f32.powf(score);
                IntentDetection {
                    intent,
                    confidence: (share * strength).clamp(0.0, 1.0),
                    matched_keywords: matched,
                }
            }
            _ => IntentDetection::unknown(),
        }
    }
}

impl Default for IntentDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Substring match with ASCII word boundaries. `all` must not hit inside
/// `install`; Japanese keywords have no such boundary and match plainly.
fn keyword_in(haystack: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(keyword) {
        let start = from + pos;
        let end = start + keyword.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Hiragana, katakana, or CJK ideographs anywhere mark the query Japanese.
pub fn detect_language(query: &str) -> Language {
    let japanese = query.chars().any(|c| {
        ('\u{3040}'..='\u{30FF}').contains(&c) || ('\u{4E00}'..='\u{9FFF}').contains(&c)
    });
    if japanese {
        Language::Japanese
    } else {
        Language::English
    }
}
