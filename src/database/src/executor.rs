//! Guarded read-only executor.
//!
//! Runs validated SELECT text for dry-runs and the admin validation
//! endpoint. This is deliberately not the data path for user queries;
//! those go through `CmmsRepository`'s parameterized statements.

use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, warn};

use cmms_shared::types::ExecutionResult;

use crate::error::DatabaseError;

/// Outcome of an EXPLAIN-based pre-check.
#[derive(Debug, Clone, PartialEq)]
pub enum DryRunOutcome {
    /// The database accepted the statement.
    Passed,
    /// The database rejected the statement (planner/parse error).
    Rejected(String),
    /// The pre-check itself could not run (pool or transport failure).
    Unavailable(String),
}

#[derive(Clone)]
pub struct QueryGuard {
    pool: Arc<PgPool>,
}

impl QueryGuard {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Execute a SELECT statement, returning rows as JSON objects and
    /// truncating at `max_rows`. Non-SELECT text is refused before it
    /// reaches the database.
    pub async fn execute_select(
        &self,
        sql: &str,
        max_rows: u32,
    ) -> Result<ExecutionResult, DatabaseError> {
        let trimmed = Self::normalize(sql)?;

        // json_agg over a bounded subquery keeps column handling in the
        // database; one extra row detects truncation.
        let fetch_limit = i64::from(max_rows) + 1;
        let wrapped = format!(
            "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) AS rows \
             FROM (SELECT * FROM ({trimmed}) AS inner_q LIMIT {fetch_limit}) AS q"
        );

        debug!(max_rows, "Executing guarded SELECT");
        let row = sqlx::query(&wrapped).fetch_one(&*self.pool).await?;
        let value: serde_json::Value = row
            .try_get("rows")
            .map_err(|e| DatabaseError::Decode(e.to_string()))?;

        let mut rows = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        let truncated = rows.len() > max_rows as usize;
        rows.truncate(max_rows as usize);

        Ok(ExecutionResult {
            row_count: rows.len(),
            rows,
            truncated,
        })
    }

    /// Best-effort EXPLAIN check. Callers must treat `Unavailable` as a
    /// warning, never as a validation failure.
    pub async fn dry_run(&self, sql: &str) -> DryRunOutcome {
        let trimmed = match Self::normalize(sql) {
            Ok(t) => t,
            Err(e) => return DryRunOutcome::Rejected(e.to_string()),
        };

        let explain = format!("EXPLAIN {trimmed}");
        match sqlx::query(&explain).fetch_all(&*self.pool).await {
            Ok(_) => DryRunOutcome::Passed,
            Err(err) => match DatabaseError::from(err) {
                DatabaseError::Unavailable(msg) => {
                    warn!(error = %msg, "Dry-run infrastructure unavailable");
                    DryRunOutcome::Unavailable(msg)
                }
                other => DryRunOutcome::Rejected(other.to_string()),
            },
        }
    }

    /// Strip trailing semicolons and refuse anything but a single
    /// SELECT/WITH statement.
    fn normalize(sql: &str) -> Result<String, DatabaseError> {
        let trimmed = sql.trim().trim_end_matches(';').trim().to_string();
        if trimmed.is_empty() {
            return Err(DatabaseError::Rejected("empty statement".to_string()));
        }
        let upper = trimmed.to_uppercase();
        if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
            return Err(DatabaseError::Rejected(
                "only SELECT statements are executable".to_string(),
            ));
        }
        if trimmed.contains(';') {
            return Err(DatabaseError::Rejected(
                "multiple statements are not allowed".to_string(),
            ));
        }
        Ok(trimmed)
    }
}
