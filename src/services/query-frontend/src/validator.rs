//! Staged SQL validation.
//!
//! Generated SQL passes through syntax, security, schema, and performance
//! checks before anything touches the database. Security and syntax
//! findings are errors; performance findings are warnings, and the
//! validator fixes what it safely can by rewriting (normalizing
//! vocabulary, appending a LIMIT, capping an oversized one). String
//! literals are masked before keyword scanning so data values never trip
//! the filters.

use cmms_database::{DryRunOutcome, QueryGuard, SchemaCatalog};
use cmms_shared::{
    FindingType, Severity, ValidationError, ValidationResult, ValidationWarning,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static FORBIDDEN_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|MERGE|COPY|VACUUM|CALL|DO|LOCK|SET|RESET|LISTEN|NOTIFY|PREPARE|EXECUTE|EXEC|DEALLOCATE)\b",
    )
    .expect("static keyword pattern")
});

static DANGEROUS_FUNCTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:pg_sleep|pg_read_file|pg_write_file|pg_ls_dir|pg_terminate_backend|pg_cancel_backend|dblink|lo_import|lo_export)\s*\(",
    )
    .expect("static function pattern")
});

static SYSTEM_CATALOGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:pg_catalog|information_schema|pg_shadow|pg_authid|pg_roles)\b")
        .expect("static catalog pattern")
});

static UNION_SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bunion(?:\s+all)?\s+select\b").expect("static union pattern")
});

static OR_QUOTED_COMPARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bor\s+'([^']*)'\s*=\s*'([^']*)'").expect("static tautology pattern")
});

static OR_NUMERIC_COMPARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bor\s+(\d+)\s*=\s*(\d+)\b").expect("static tautology pattern")
});

static TABLE_REFS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:from|join)\s+([a-zA-Z_][a-zA-Z0-9_]*)(?:\s+(?:as\s+)?([a-zA-Z_][a-zA-Z0-9_]*))?",
    )
    .expect("static table pattern")
});

static CTE_NAMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-zA-Z_][a-zA-Z0-9_]*)\s+as\s*\(").expect("static cte pattern")
});

static QUALIFIED_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b")
        .expect("static column pattern")
});

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i),\s*(?:from|where|group\s+by|order\s+by|having|limit|\)|$)")
        .expect("static comma pattern")
});

static HAS_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfrom\b").expect("static from pattern"));

static COMMA_JOIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+[a-zA-Z_][a-zA-Z0-9_]*(?:\s+(?:as\s+)?[a-zA-Z_][a-zA-Z0-9_]*)?\s*,")
        .expect("static join pattern")
});

static WHERE_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("static where pattern"));

static OR_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bor\b").expect("static or pattern"));

static AGGREGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:count|sum|avg|min|max)\s*\(|\bgroup\s+by\b")
        .expect("static aggregate pattern")
});

static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blimit\s+(\d+)").expect("static limit pattern"));

static ORDER_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\border\s+by\b").expect("static order pattern"));

static SELECT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)select\s+\*").expect("static star pattern"));

static CONTAINS_LIKE_ON_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:equipment|system|parameter)_id\s+i?like\s+)'%([^%']+)%'")
        .expect("static like pattern")
});

/// Japanese status vocabulary inside literals, rewritten to the stored
/// enum values so the statement actually matches rows.
const VOCAB_REWRITES: &[(&str, &str)] = &[
    ("'稼働中'", "'running'"),
    ("'運転中'", "'running'"),
    ("'停止中'", "'stopped'"),
    ("'整備中'", "'maintenance'"),
    ("'保全中'", "'maintenance'"),
    ("'警報'", "'alarm'"),
    ("'アラーム'", "'alarm'"),
];

/// Keywords that can follow a table name and must not be read as its alias.
const RESERVED_AFTER_TABLE: &[&str] = &[
    "where", "on", "join", "inner", "left", "right", "full", "cross", "group", "order", "having",
    "limit", "union", "select", "and", "or", "not", "using",
];

pub struct SqlValidator {
    catalog: SchemaCatalog,
    default_limit: u32,
    max_rows: u32,
}

impl SqlValidator {
    pub fn new(catalog: SchemaCatalog, default_limit: u32, max_rows: u32) -> Self {
        Self {
            catalog,
            default_limit,
            max_rows,
        }
    }

    /// Full validation. The dry-run stage only runs when the static stages
    /// pass and a guard is supplied; an unavailable dry-run downgrades to a
    /// warning rather than failing the query.
    pub async fn validate(&self, sql: &str, guard: Option<&QueryGuard>) -> ValidationResult {
        let mut result = self.validate_static(sql);
        if result.is_valid {
            if let Some(guard) = guard {
                let target = result
                    .rewritten_query
                    .clone()
                    .unwrap_or_else(|| sql.trim().trim_end_matches(';').to_string());
                let outcome = guard.dry_run(&target).await;
                self.apply_dry_run(&mut result, outcome);
            }
        }
        result
    }

    pub fn validate_static(&self, sql: &str) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        let mut rewritten = None;

        let trimmed = sql.trim().trim_end_matches(';').trim().to_string();
        let (masked, strings_ok) = mask_string_literals(&trimmed);

        self.check_syntax(&trimmed, &masked, strings_ok, &mut errors);
        self.check_security(&trimmed, &masked, &mut errors);
        if errors.is_empty() {
            self.check_schema(&masked, &mut errors, &mut warnings);
        }
        if errors.is_empty() {
            rewritten = self.check_performance(&trimmed, &mut warnings, &mut suggestions);
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
            rewritten_query: rewritten,
            estimated_cost: None,
        }
    }

    /// Fold a dry-run outcome into the result. Rejection is a real error;
    /// infrastructure trouble must not block an otherwise valid query.
    pub fn apply_dry_run(&self, result: &mut ValidationResult, outcome: DryRunOutcome) {
        match outcome {
            DryRunOutcome::Passed => {}
            DryRunOutcome::Rejected(message) => {
                result.is_valid = false;
                result.errors.push(ValidationError {
                    error_type: FindingType::Logic,
                    severity: Severity::High,
                    message: format!("database rejected the statement: {}", message),
                    suggestion: Some("Rephrase the question or simplify the request".to_string()),
                });
            }
            DryRunOutcome::Unavailable(message) => {
                result.warnings.push(ValidationWarning {
                    warning_type: FindingType::Logic,
                    message: format!("statement pre-check skipped: {}", message),
                    suggestion: None,
                });
            }
        }
    }

    fn check_syntax(
        &self,
        sql: &str,
        masked: &str,
        strings_ok: bool,
        errors: &mut Vec<ValidationError>,
    ) {
        if sql.is_empty() {
            errors.push(syntax_error("statement is empty", None));
            return;
        }

        let upper = sql.to_uppercase();
        let is_select = upper.starts_with("SELECT") || upper.starts_with("WITH");
        if !is_select {
            errors.push(syntax_error(
                "only SELECT statements are allowed",
                Some("Ask a question that reads data rather than changing it"),
            ));
        }

        if !strings_ok {
            errors.push(syntax_error("unterminated string literal", None));
        }

        if masked.contains(';') {
            errors.push(syntax_error("multiple statements are not allowed", None));
        }

        if is_select && !HAS_FROM.is_match(masked) {
            errors.push(syntax_error(
                "SELECT without a FROM clause",
                Some("Name one of the maintenance tables"),
            ));
        }

        if TRAILING_COMMA.is_match(masked) {
            errors.push(syntax_error("dangling comma", None));
        }

        let mut depth: i64 = 0;
        let mut unbalanced = false;
        for c in masked.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        unbalanced = true;
                        break;
                    }
                }
                _ => {}
            }
        }
        if unbalanced || depth != 0 {
            errors.push(syntax_error("unbalanced parentheses", None));
        }
    }

    fn check_security(&self, sql: &str, masked: &str, errors: &mut Vec<ValidationError>) {
        if let Some(hit) = FORBIDDEN_KEYWORDS.find(masked) {
            errors.push(security_error(format!(
                "mutating keyword {} is not allowed",
                hit.as_str().to_uppercase()
            )));
        }
        if DANGEROUS_FUNCTIONS.is_match(masked) {
            errors.push(security_error(
                "call to a restricted system function".to_string(),
            ));
        }
        if SYSTEM_CATALOGS.is_match(masked) {
            errors.push(security_error(
                "system catalog access is not allowed".to_string(),
            ));
        }
        if UNION_SELECT.is_match(masked) {
            errors.push(security_error(
                "UNION composition is not allowed".to_string(),
            ));
        }
        if masked.contains("--") || masked.contains("/*") {
            errors.push(security_error("SQL comments are not allowed".to_string()));
        }
        // Tautologies compare literal contents, so scan the raw text.
        if has_tautology(sql) {
            errors.push(security_error(
                "always-true OR comparison".to_string(),
            ));
        }
    }

    fn check_schema(
        &self,
        masked: &str,
        errors: &mut Vec<ValidationError>,
        warnings: &mut Vec<ValidationWarning>,
    ) {
        let cte_names: Vec<String> = CTE_NAMES
            .captures_iter(masked)
            .map(|c| c[1].to_lowercase())
            .collect();
        let allowed = self.catalog.allowed_tables();

        let mut aliases: HashMap<String, String> = HashMap::new();
        for capture in TABLE_REFS.captures_iter(masked) {
            let table = capture[1].to_lowercase();
            if let Some(alias) = capture.get(2) {
                let alias = alias.as_str().to_lowercase();
                if !RESERVED_AFTER_TABLE.contains(&alias.as_str()) {
                    aliases.insert(alias, table.clone());
                }
            }
            if cte_names.contains(&table) {
                continue;
            }
            if !allowed.iter().any(|t| t.eq_ignore_ascii_case(&table)) {
                errors.push(ValidationError {
                    error_type: FindingType::Security,
                    severity: Severity::High,
                    message: format!("table '{}' is not part of the maintenance schema", table),
                    suggestion: Some(format!("Available tables: {}", allowed.join(", "))),
                });
            }
        }

        // Qualified column references are checked against the catalog, but
        // an unknown column only warns; the dry-run is what rejects it.
        for capture in QUALIFIED_REF.captures_iter(masked) {
            let qualifier = capture[1].to_lowercase();
            let column = capture[2].to_lowercase();
            let table_name = match aliases.get(&qualifier) {
                Some(table) => table.clone(),
                None if allowed.iter().any(|t| t.eq_ignore_ascii_case(&qualifier)) => qualifier,
                None => continue,
            };
            let table = match self.catalog.table(&table_name) {
                Some(table) => table,
                None => continue,
            };
            if !table
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column))
            {
                warnings.push(ValidationWarning {
                    warning_type: FindingType::Logic,
                    message: format!("column '{}' is not part of table '{}'", column, table_name),
                    suggestion: Some(format!(
                        "Columns of {}: {}",
                        table_name,
                        table
                            .columns
                            .iter()
                            .map(|c| c.name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                });
            }
        }
    }

    /// Performance warnings plus the rewrite stage. Vocabulary and LIKE
    /// rules run first; the LIMIT and ORDER BY guards then apply to the
    /// rewritten text.
    fn check_performance(
        &self,
        sql: &str,
        warnings: &mut Vec<ValidationWarning>,
        suggestions: &mut Vec<String>,
    ) -> Option<String> {
        let mut working = sql.to_string();
        let mut changed = false;

        for (from, to) in VOCAB_REWRITES {
            if working.contains(from) {
                working = working.replace(from, to);
                changed = true;
            }
        }
        if CONTAINS_LIKE_ON_ID.is_match(&working) {
            working = CONTAINS_LIKE_ON_ID
                .replace_all(&working, "${1}'${2}%'")
                .into_owned();
            changed = true;
            warnings.push(ValidationWarning {
                warning_type: FindingType::Performance,
                message: "contains-match on an id column rewritten to a prefix match".to_string(),
                suggestion: None,
            });
        }

        let (masked, _) = mask_string_literals(&working);

        if SELECT_STAR.is_match(&masked) {
            warnings.push(ValidationWarning {
                warning_type: FindingType::Performance,
                message: "SELECT * returns every column".to_string(),
                suggestion: Some("List only the columns you need".to_string()),
            });
        }

        if COMMA_JOIN.is_match(&masked) {
            warnings.push(ValidationWarning {
                warning_type: FindingType::Performance,
                message: "comma join risks a cartesian product".to_string(),
                suggestion: Some("Use an explicit JOIN with an ON condition".to_string()),
            });
        }

        if let Some(hit) = WHERE_KEYWORD.find(&masked) {
            let or_count = OR_KEYWORD.find_iter(&masked[hit.end()..]).count();
            if or_count > 3 {
                warnings.push(ValidationWarning {
                    warning_type: FindingType::Performance,
                    message: format!("{} OR conditions in one WHERE clause", or_count),
                    suggestion: Some("Consider an IN (...) list".to_string()),
                });
            }
        }

        let has_order_by = ORDER_BY.is_match(&masked);
        match LIMIT_CLAUSE.captures(&masked) {
            None => {
                // Aggregates return few rows; forcing a LIMIT onto them
                // only obscures the answer.
                if !AGGREGATION.is_match(&masked) {
                    if !has_order_by {
                        working.push_str(" ORDER BY 1");
                        warnings.push(ValidationWarning {
                            warning_type: FindingType::Performance,
                            message: "no ORDER BY: row order would be unstable".to_string(),
                            suggestion: None,
                        });
                    }
                    working.push_str(&format!(" LIMIT {}", self.default_limit));
                    warnings.push(ValidationWarning {
                        warning_type: FindingType::Performance,
                        message: format!("no LIMIT: capped at {} rows", self.default_limit),
                        suggestion: None,
                    });
                    suggestions.push(format!(
                        "Results are limited to {} rows",
                        self.default_limit
                    ));
                    changed = true;
                }
            }
            Some(capture) => {
                let requested: u64 = capture[1].parse().unwrap_or(u64::MAX);
                if requested > u64::from(self.max_rows) {
                    working = LIMIT_CLAUSE
                        .replace(&working, format!("LIMIT {}", self.max_rows))
                        .into_owned();
                    warnings.push(ValidationWarning {
                        warning_type: FindingType::Performance,
                        message: format!(
                            "LIMIT {} exceeds the {} row cap",
                            requested, self.max_rows
                        ),
                        suggestion: None,
                    });
                    suggestions.push(format!("Results are limited to {} rows", self.max_rows));
                    changed = true;
                }
                if !has_order_by {
                    working = LIMIT_CLAUSE
                        .replace(&working, "ORDER BY 1 LIMIT ${1}")
                        .into_owned();
                    warnings.push(ValidationWarning {
                        warning_type: FindingType::Performance,
                        message: "LIMIT without ORDER BY returns arbitrary rows".to_string(),
                        suggestion: None,
                    });
                    changed = true;
                }
            }
        }

        changed.then_some(working)
    }
}

fn syntax_error(message: &str, suggestion: Option<&str>) -> ValidationError {
    ValidationError {
        error_type: FindingType::Syntax,
        severity: Severity::High,
        message: message.to_string(),
        suggestion: suggestion.map(|s| s.to_string()),
    }
}

fn security_error(message: String) -> ValidationError {
    ValidationError {
        error_type: FindingType::Security,
        severity: Severity::Critical,
        message,
        suggestion: None,
    }
}

/// Classic injection probe: an OR comparing a constant to itself.
fn has_tautology(sql: &str) -> bool {
    OR_QUOTED_COMPARE.captures_iter(sql).any(|c| c[1] == c[2])
        || OR_NUMERIC_COMPARE.captures_iter(sql).any(|c| c[1] == c[2])
}

/// Collapse each single-quoted literal (doubled quotes included) into a
/// `?` placeholder. Returns false when a literal never closes.
fn mask_string_literals(sql: &str) -> (String, bool) {
    let mut masked = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            masked.push(c);
            continue;
        }
        masked.push('?');
        let mut closed = false;
        while let Some(inner) = chars.next() {
            if inner == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    closed = true;
                    break;
                }
            }
        }
        if !closed {
            return (masked, false);
        }
    }
    (masked, true)
}
