//! Entity extraction and resolution.
//!
//! A fixed, priority-ordered rule table finds candidate spans (equipment,
//! system, and parameter ids, equipment types, time periods, locations,
//! statuses, departments) in English and Japanese query text. Higher
//! priority rules claim their spans first; later matches overlapping a
//! claimed span are dropped. Id candidates are resolved against reference
//! data with exact matching first, then normalized edit-distance fuzzy
//! matching; near misses become suggestions.

use crate::error::{AppError, ErrorContext};
use cmms_database::{MasterData, MasterDataSource};
use cmms_shared::{
    EntityExtraction, EntityKind, EntityResolution, EntitySpan, ResolvedValue, UnresolvedEntity,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// Fuzzy candidates below the acceptance threshold but at or above this
/// score are offered as suggestions.
const SUGGESTION_FLOOR: f32 = 0.5;
const MAX_ALTERNATIVES: usize = 3;
const MAX_SUGGESTIONS: usize = 5;

struct EntityRule {
    kind: EntityKind,
    priority: u8,
    pattern: Regex,
    /// Ids must not touch ASCII identifier characters on either side.
    /// Plain `\b` cannot express this next to Japanese text, so the
    /// check runs outside the regex.
    ascii_boundaries: bool,
}

impl EntityRule {
    fn new(kind: EntityKind, priority: u8, pattern: &str, ascii_boundaries: bool) -> Self {
        Self {
            kind,
            priority,
            pattern: Regex::new(pattern).expect("static entity pattern"),
            ascii_boundaries,
        }
    }
}

static ENTITY_RULES: Lazy<Vec<EntityRule>> = Lazy::new(|| {
    vec![
        EntityRule::new(EntityKind::System, 120, r"(?i)SYS-\d{3}", true),
        EntityRule::new(EntityKind::Parameter, 110, r"[A-Za-z]{1,3}-\d{3}-\d{2}", true),
        EntityRule::new(EntityKind::Equipment, 100, r"[A-Za-z]{1,4}-\d{3}", true),
        EntityRule::new(
            EntityKind::TimePeriod,
            70,
            r"(?i)\b(?:last|past)\s+\d+\s+days?\b|\b(?:last|past|this)\s+(?:week|month|year)\b|\btoday\b|\byesterday\b|過去\d+日間?|先週|今週|先月|今月|昨年|去年|今年|本日|今日|昨日",
            false,
        ),
        EntityRule::new(
            EntityKind::EquipmentType,
            60,
            r"(?i)\b(?:heat\s+exchangers?|pumps?|tanks?|compressors?|valves?|motors?)\b|熱交換器|ポンプ|タンク|圧縮機|コンプレッサー?|バルブ|モーター?|電動機",
            false,
        ),
        EntityRule::new(
            EntityKind::Location,
            50,
            r"(?i)\b(?:unit|area|building)\s+[A-Za-z0-9]+\b|第\d+(?:工場|プラント|エリア)|[東西南北](?:プラント|エリア)",
            false,
        ),
        EntityRule::new(
            EntityKind::Status,
            40,
            r"(?i)\b(?:running|operating|stopped|down|under\s+maintenance|in\s+maintenance|alarm(?:ing)?)\b|稼働中|運転中|停止中|整備中|保全中|警報|アラーム",
            false,
        ),
        EntityRule::new(
            EntityKind::Department,
            30,
            r"(?i)\b(?:maintenance|operations|engineering|instrumentation)\s+(?:department|team|dept)\b|保全部|運転部|技術部|工務部|計装課",
            false,
        ),
    ]
});

/// (keyword, type code in equipment_type_master, canonical name)
const TYPE_TABLE: &[(&str, i32, &str)] = &[
    ("熱交換器", 1, "Heat Exchanger"),
    ("heat", 1, "Heat Exchanger"),
    ("ポンプ", 2, "Pump"),
    ("pump", 2, "Pump"),
    ("タンク", 3, "Tank"),
    ("tank", 3, "Tank"),
    ("圧縮機", 4, "Compressor"),
    ("コンプレッサ", 4, "Compressor"),
    ("compressor", 4, "Compressor"),
    ("バルブ", 5, "Valve"),
    ("valve", 5, "Valve"),
    ("モータ", 6, "Motor"),
    ("電動機", 6, "Motor"),
    ("motor", 6, "Motor"),
];

const STATUS_TABLE: &[(&str, &str)] = &[
    ("稼働中", "running"),
    ("運転中", "running"),
    ("running", "running"),
    ("operating", "running"),
    ("停止中", "stopped"),
    ("stopped", "stopped"),
    ("down", "stopped"),
    ("整備中", "maintenance"),
    ("保全中", "maintenance"),
    ("maintenance", "maintenance"),
    ("警報", "alarm"),
    ("アラーム", "alarm"),
    ("alarm", "alarm"),
];

const DEPARTMENT_TABLE: &[(&str, &str)] = &[
    ("保全部", "Maintenance"),
    ("maintenance", "Maintenance"),
    ("運転部", "Operations"),
    ("operations", "Operations"),
    ("技術部", "Engineering"),
    ("工務部", "Engineering"),
    ("engineering", "Engineering"),
    ("計装課", "Instrumentation"),
    ("instrumentation", "Instrumentation"),
];

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static digit pattern"));

struct MasterState {
    data: Arc<MasterData>,
    fetched_at: Option<Instant>,
}

/// Reference-data snapshot with time-based refresh.
///
/// Refresh failures are logged and the previous snapshot keeps serving;
/// extraction quality degrades gracefully instead of failing the query.
pub struct MasterDataCache {
    source: Arc<dyn MasterDataSource>,
    ttl: Duration,
    state: RwLock<MasterState>,
}

impl MasterDataCache {
    pub fn new(source: Arc<dyn MasterDataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(MasterState {
                data: Arc::new(MasterData::default()),
                fetched_at: None,
            }),
        }
    }

    /// Current snapshot, refreshing from the source when stale.
    pub async fn snapshot(&self) -> Arc<MasterData> {
        {
            let state = self.state.read().await;
            if let Some(at) = state.fetched_at {
                if at.elapsed() < self.ttl {
                    return state.data.clone();
                }
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(at) = state.fetched_at {
            if at.elapsed() < self.ttl {
                return state.data.clone();
            }
        }
        match self.source.load().await {
            Ok(data) => {
                state.data = Arc::new(data);
                state.fetched_at = Some(Instant::now());
            }
            Err(err) => {
                warn!(error = %err, "master data refresh failed, serving previous snapshot");
            }
        }
        state.data.clone()
    }

    /// Force an immediate reload. Used at startup and by the admin
    /// invalidation endpoint.
    pub async fn refresh(&self) -> Result<(), AppError> {
        let data = self.source.load().await.with_context("master data refresh")?;
        let mut state = self.state.write().await;
        state.data = Arc::new(data);
        state.fetched_at = Some(Instant::now());
        Ok(())
    }
}

struct Candidate {
    kind: EntityKind,
    priority: u8,
    start: usize,
    end: usize,
    text: String,
}

enum Resolution {
    Entity(EntityResolution),
    Unresolved(UnresolvedEntity, Vec<String>),
}

pub struct EntityResolver {
    master: Arc<MasterDataCache>,
    fuzzy_threshold: f32,
}

impl EntityResolver {
    pub fn new(master: Arc<MasterDataCache>, fuzzy_threshold: f32) -> Self {
        Self {
            master,
            fuzzy_threshold,
        }
    }

    /// Extract and resolve every entity in `query`. Never fails; reference
    /// data problems surface as unresolved entities, not errors.
    pub async fn extract(&self, query: &str) -> EntityExtraction {
        let master = self.master.snapshot().await;
        let accepted = claim_spans(collect_candidates(query));

        let mut entities = Vec::new();
        let mut unresolved = Vec::new();
        let mut suggestions = Vec::new();
        for candidate in accepted {
            match self.resolve(&candidate, &master) {
                Resolution::Entity(entity) => entities.push(entity),
                Resolution::Unresolved(miss, hints) => {
                    unresolved.push(miss);
                    suggestions.extend(hints);
                }
            }
        }
        entities.sort_by_key(|e| e.span.start);
        unresolved.sort_by_key(|u| u.span.start);

        let mut seen = HashSet::new();
        suggestions.retain(|s| seen.insert(s.clone()));
        suggestions.truncate(MAX_SUGGESTIONS);

        let resolved_count = entities.len();
        let total = resolved_count + unresolved.len();
        let confidence = if total == 0 {
            1.0
        } else {
            resolved_count as f32 / total as f32
        };

        EntityExtraction {
            entities,
            unresolved,
            confidence,
            suggestions,
        }
    }

    fn resolve(&self, candidate: &Candidate, master: &MasterData) -> Resolution {
        let span = EntitySpan {
            start: candidate.start,
            end: candidate.end,
        };
        let text = candidate.text.as_str();
        match candidate.kind {
            EntityKind::Equipment => self.resolve_id(
                text,
                span,
                EntityKind::Equipment,
                &master.equipment_ids,
                |id| ResolvedValue::Equipment { equipment_id: id },
            ),
            EntityKind::System => {
                self.resolve_id(text, span, EntityKind::System, &master.system_ids, |id| {
                    ResolvedValue::System { system_id: id }
                })
            }
            EntityKind::Parameter => self.resolve_id(
                text,
                span,
                EntityKind::Parameter,
                &master.parameter_ids,
                |id| ResolvedValue::Parameter { parameter_id: id },
            ),
            EntityKind::EquipmentType => match lookup_type(text) {
                Some((type_code, canonical)) => Resolution::Entity(EntityResolution {
                    original: text.to_string(),
                    resolved: ResolvedValue::EquipmentType {
                        type_code,
                        canonical: canonical.to_string(),
                    },
                    confidence: 1.0,
                    alternatives: Vec::new(),
                    span,
                }),
                None => unresolved(text, EntityKind::EquipmentType, span),
            },
            EntityKind::Status => match lookup_status(text) {
                Some(canonical) => Resolution::Entity(EntityResolution {
                    original: text.to_string(),
                    resolved: ResolvedValue::Status {
                        canonical: canonical.to_string(),
                    },
                    confidence: 1.0,
                    alternatives: Vec::new(),
                    span,
                }),
                None => unresolved(text, EntityKind::Status, span),
            },
            EntityKind::Department => match lookup_department(text) {
                Some(canonical) => Resolution::Entity(EntityResolution {
                    original: text.to_string(),
                    resolved: ResolvedValue::Department {
                        canonical: canonical.to_string(),
                    },
                    confidence: 1.0,
                    alternatives: Vec::new(),
                    span,
                }),
                None => unresolved(text, EntityKind::Department, span),
            },
            EntityKind::Location => Resolution::Entity(EntityResolution {
                original: text.to_string(),
                resolved: ResolvedValue::Location {
                    canonical: text.trim().to_string(),
                },
                confidence: 1.0,
                alternatives: Vec::new(),
                span,
            }),
            EntityKind::TimePeriod => match resolve_time(text, Utc::now()) {
                Some((start, end, label)) => Resolution::Entity(EntityResolution {
                    original: text.to_string(),
                    resolved: ResolvedValue::TimePeriod { start, end, label },
                    confidence: 1.0,
                    alternatives: Vec::new(),
                    span,
                }),
                None => unresolved(text, EntityKind::TimePeriod, span),
            },
        }
    }

    fn resolve_id(
        &self,
        text: &str,
        span: EntitySpan,
        kind: EntityKind,
        candidates: &[String],
        build: impl Fn(String) -> ResolvedValue,
    ) -> Resolution {
        let needle = text.to_uppercase();
        if let Some(exact) = candidates.iter().find(|c| c.eq_ignore_ascii_case(&needle)) {
            return Resolution::Entity(EntityResolution {
                original: text.to_string(),
                resolved: build(exact.clone()),
                confidence: 1.0,
                alternatives: Vec::new(),
                span,
            });
        }

        let mut scored: Vec<(&String, f32)> = candidates
            .iter()
            .map(|c| (c, similarity(&needle, &c.to_uppercase())))
            .filter(|(_, score)| *score >= SUGGESTION_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        match scored.first() {
            Some((best, score)) if *score >= self.fuzzy_threshold => {
                let alternatives = scored
                    .iter()
                    .skip(1)
                    .filter(|(_, s)| *s >= self.fuzzy_threshold)
                    .take(MAX_ALTERNATIVES)
                    .map(|(c, _)| (*c).clone())
                    .collect();
                Resolution::Entity(EntityResolution {
                    original: text.to_string(),
                    resolved: build((*best).clone()),
                    confidence: *score,
                    alternatives,
                    span,
                })
            }
            _ => {
                let hints = scored
                    .iter()
                    .take(MAX_ALTERNATIVES)
                    .map(|(c, _)| format!("Did you mean {}?", c))
                    .collect();
                Resolution::Unresolved(
                    UnresolvedEntity {
                        original: text.to_string(),
                        kind,
                        span,
                    },
                    hints,
                )
            }
        }
    }
}

fn unresolved(text: &str, kind: EntityKind, span: EntitySpan) -> Resolution {
    Resolution::Unresolved(
        UnresolvedEntity {
            original: text.to_string(),
            kind,
            span,
        },
        Vec::new(),
    )
}

fn collect_candidates(query: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for rule in ENTITY_RULES.iter() {
        for hit in rule.pattern.find_iter(query) {
            if rule.ascii_boundaries && !ascii_bounded(query, hit.start(), hit.end()) {
                continue;
            }
            candidates.push(Candidate {
                kind: rule.kind,
                priority: rule.priority,
                start: hit.start(),
                end: hit.end(),
                text: hit.as_str().to_string(),
            });
        }
    }
    candidates
}

/// Accept candidates by priority (then position, then length), dropping
/// any whose span overlaps an already accepted one.
fn claim_spans(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.start.cmp(&b.start))
            .then((b.end - b.start).cmp(&(a.end - a.start)))
    });

    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let span = EntitySpan {
            start: candidate.start,
            end: candidate.end,
        };
        let clash = accepted.iter().any(|a| {
            span.overlaps(&EntitySpan {
                start: a.start,
                end: a.end,
            })
        });
        if !clash {
            accepted.push(candidate);
        }
    }
    accepted
}

fn ascii_bounded(query: &str, start: usize, end: usize) -> bool {
    let joins = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    let before_ok = query[..start].chars().next_back().map_or(true, |c| !joins(c));
    let after_ok = query[end..].chars().next().map_or(true, |c| !joins(c));
    before_ok && after_ok
}

fn lookup_type(text: &str) -> Option<(i32, &'static str)> {
    let lower = text.to_lowercase();
    TYPE_TABLE
        .iter()
        .find(|(keyword, _, _)| lower.contains(keyword))
        .map(|(_, code, canonical)| (*code, *canonical))
}

fn lookup_status(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    STATUS_TABLE
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, canonical)| *canonical)
}

fn lookup_department(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    DEPARTMENT_TABLE
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, canonical)| *canonical)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn first_of_previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn first_of_year(year: i32, fallback: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(fallback)
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Resolve a matched time phrase into an absolute `[start, end)` range.
fn resolve_time(
    text: &str,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>, String)> {
    let lower = text.to_lowercase();
    let today = now.date_naive();

    // "past 30 days" / 過去30日: the digits decide.
    if let Some(digits) = DIGITS.find(&lower) {
        let days: i64 = digits.as_str().parse().ok()?;
        return Some((
            now - chrono::Duration::days(days),
            now,
            format!("past_{}_days", days),
        ));
    }

    if lower.contains("yesterday") || lower.contains("昨日") {
        let yesterday = today - chrono::Duration::days(1);
        return Some((
            start_of_day(yesterday),
            start_of_day(today),
            "yesterday".to_string(),
        ));
    }
    if lower.contains("today") || lower.contains("今日") || lower.contains("本日") {
        return Some((start_of_day(today), now, "today".to_string()));
    }
    if lower.contains("last week") || lower.contains("past week") || lower.contains("先週") {
        let this_week = week_start(today);
        let last_week = this_week - chrono::Duration::days(7);
        return Some((
            start_of_day(last_week),
            start_of_day(this_week),
            "last_week".to_string(),
        ));
    }
    if lower.contains("this week") || lower.contains("今週") {
        return Some((start_of_day(week_start(today)), now, "this_week".to_string()));
    }
    if lower.contains("last month") || lower.contains("past month") || lower.contains("先月") {
        let this_month = first_of_month(today);
        let last_month = first_of_previous_month(today);
        return Some((
            start_of_day(last_month),
            start_of_day(this_month),
            "last_month".to_string(),
        ));
    }
    if lower.contains("this month") || lower.contains("今月") {
        return Some((start_of_day(first_of_month(today)), now, "this_month".to_string()));
    }
    if lower.contains("last year")
        || lower.contains("past year")
        || lower.contains("昨年")
        || lower.contains("去年")
    {
        let this_year = first_of_year(today.year(), today);
        let last_year = first_of_year(today.year() - 1, today);
        return Some((
            start_of_day(last_year),
            start_of_day(this_year),
            "last_year".to_string(),
        ));
    }
    if lower.contains("this year") || lower.contains("今年") {
        return Some((
            start_of_day(first_of_year(today.year(), today)),
            now,
            "this_year".to_string(),
        ));
    }
    None
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Normalized similarity in `[0, 1]`: identical strings score 1.0.
fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmms_database::DatabaseError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn master_fixture() -> MasterData {
        let mut equipment_names = HashMap::new();
        equipment_names.insert("HX-101".to_string(), "Main heat exchanger".to_string());
        MasterData {
            equipment_ids: vec![
                "HX-101".to_string(),
                "HX-102".to_string(),
                "P-102".to_string(),
                "TK-201".to_string(),
            ],
            system_ids: vec!["SYS-001".to_string(), "SYS-002".to_string()],
            parameter_ids: vec![
                "TI-101-01".to_string(),
                "VI-100-01".to_string(),
                "FI-100-01".to_string(),
            ],
            equipment_names,
        }
    }

    struct StubSource;

    #[async_trait]
    impl MasterDataSource for StubSource {
        async fn load(&self) -> Result<MasterData, DatabaseError> {
            Ok(master_fixture())
        }
    }

    struct FlakySource {
        loads: AtomicU32,
    }

    #[async_trait]
    impl MasterDataSource for FlakySource {
        async fn load(&self) -> Result<MasterData, DatabaseError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(master_fixture())
            } else {
                Err(DatabaseError::Connection("connection refused".to_string()))
            }
        }
    }

    fn resolver() -> EntityResolver {
        let cache = MasterDataCache::new(Arc::new(StubSource), Duration::from_secs(900));
        EntityResolver::new(Arc::new(cache), 0.7)
    }

    #[tokio::test]
    async fn test_exact_equipment_id() {
        let extraction = resolver().extract("What is the status of HX-101?").await;
        assert_eq!(extraction.entities.len(), 1);
        let entity = &extraction.entities[0];
        assert_eq!(entity.original, "HX-101");
        assert_eq!(entity.confidence, 1.0);
        assert_eq!(
            entity.resolved,
            ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string()
            }
        );
        assert_eq!(&"What is the status of HX-101?"[entity.span.start..entity.span.end], "HX-101");
    }

    #[tokio::test]
    async fn test_lowercase_id_normalized() {
        let extraction = resolver().extract("show hx-101 please").await;
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(
            extraction.entities[0].resolved,
            ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_parameter_claims_span_before_equipment() {
        let extraction = resolver().extract("trend for TI-101-01 today").await;
        let kinds: Vec<EntityKind> = extraction
            .entities
            .iter()
            .map(|e| e.resolved.kind())
            .collect();
        assert!(kinds.contains(&EntityKind::Parameter));
        assert!(!kinds.contains(&EntityKind::Equipment));
    }

    #[tokio::test]
    async fn test_japanese_id_adjacency() {
        // No ASCII word boundary exists between the id and the particle.
        let extraction = resolver().extract("HX-101の状態を教えて").await;
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(
            extraction.entities[0].resolved,
            ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fuzzy_match_close_id() {
        // HX-109 is not in the reference data but is one edit from HX-101.
        let extraction = resolver().extract("status of HX-109").await;
        assert_eq!(extraction.entities.len(), 1);
        let entity = &extraction.entities[0];
        assert_eq!(
            entity.resolved,
            ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string()
            }
        );
        assert!(entity.confidence >= 0.7 && entity.confidence < 1.0);
        assert_eq!(entity.original, "HX-109");
        // HX-102 is equally close and rides along as an alternative.
        assert!(entity.alternatives.contains(&"HX-102".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_id_goes_unresolved() {
        let extraction = resolver().extract("status of HX-101 and ZZ-999").await;
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.unresolved.len(), 1);
        assert_eq!(extraction.unresolved[0].original, "ZZ-999");
        assert!((extraction.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_near_miss_produces_suggestion() {
        // QQ-101 is two edits from HX-101: below the accept threshold but
        // close enough to suggest.
        let miss = resolver().extract("check QQ-101").await;
        assert!(miss.entities.is_empty());
        assert_eq!(miss.unresolved.len(), 1);
        assert!(miss.suggestions.iter().any(|s| s.contains("HX-101")));
    }

    #[tokio::test]
    async fn test_system_id_resolution() {
        let extraction = resolver().extract("equipment in SYS-001").await;
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(
            extraction.entities[0].resolved,
            ResolvedValue::System {
                system_id: "SYS-001".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_equipment_type_bilingual() {
        let en = resolver().extract("list all pumps").await;
        assert_eq!(
            en.entities[0].resolved,
            ResolvedValue::EquipmentType {
                type_code: 2,
                canonical: "Pump".to_string()
            }
        );

        let ja = resolver().extract("ポンプの一覧").await;
        assert_eq!(
            ja.entities[0].resolved,
            ResolvedValue::EquipmentType {
                type_code: 2,
                canonical: "Pump".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_status_extraction_and_canonicalization() {
        let extraction = resolver().extract("which equipment is stopped").await;
        assert_eq!(
            extraction.entities[0].resolved,
            ResolvedValue::Status {
                canonical: "stopped".to_string()
            }
        );

        let ja = resolver().extract("稼働中の設備").await;
        assert_eq!(
            ja.entities[0].resolved,
            ResolvedValue::Status {
                canonical: "running".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_bare_maintenance_is_not_a_status() {
        let extraction = resolver().extract("maintenance history for HX-101").await;
        let kinds: Vec<EntityKind> = extraction
            .entities
            .iter()
            .map(|e| e.resolved.kind())
            .collect();
        assert!(!kinds.contains(&EntityKind::Status));
        assert!(kinds.contains(&EntityKind::Equipment));
    }

    #[tokio::test]
    async fn test_department_bilingual() {
        let ja = resolver().extract("保全部の作業予定").await;
        assert_eq!(
            ja.entities[0].resolved,
            ResolvedValue::Department {
                canonical: "Maintenance".to_string()
            }
        );
    }

    #[test]
    fn test_time_last_month_is_calendar_month() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let (start, end, label) = resolve_time("last month", now).unwrap();
        assert_eq!(label, "last_month");
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        // Year boundary.
        let january = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (start, _, _) = resolve_time("先月", january).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_time_past_n_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let (start, end, label) = resolve_time("past 30 days", now).unwrap();
        assert_eq!(label, "past_30_days");
        assert_eq!((end - start).num_days(), 30);

        let (start_ja, _, label_ja) = resolve_time("過去7日間", now).unwrap();
        assert_eq!(label_ja, "past_7_days");
        assert_eq!((now - start_ja).num_days(), 7);
    }

    #[tokio::test]
    async fn test_time_phrase_extracted_with_ids() {
        let extraction = resolver()
            .extract("maintenance history for HX-101 last month")
            .await;
        let kinds: Vec<EntityKind> = extraction
            .entities
            .iter()
            .map(|e| e.resolved.kind())
            .collect();
        assert!(kinds.contains(&EntityKind::Equipment));
        assert!(kinds.contains(&EntityKind::TimePeriod));
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_after_refresh_failure() {
        let source = Arc::new(FlakySource {
            loads: AtomicU32::new(0),
        });
        // Zero TTL forces a refresh attempt on every snapshot.
        let cache = MasterDataCache::new(source.clone(), Duration::ZERO);

        let first = cache.snapshot().await;
        assert_eq!(first.equipment_ids.len(), 4);

        let second = cache.snapshot().await;
        assert_eq!(second.equipment_ids.len(), 4);
        assert!(source.loads.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_levenshtein_and_similarity() {
        assert_eq!(levenshtein("HX-101", "HX-101"), 0);
        assert_eq!(levenshtein("HX-101", "HX-102"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert!((similarity("HX-101", "HX-101") - 1.0).abs() < f32::EPSILON);
        let one_edit = similarity("HX-101", "HX-1O1");
        assert!(one_edit > 0.8 && one_edit < 0.9);
    }
}
