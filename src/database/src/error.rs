//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    /// The statement was refused before reaching the database
    /// (non-SELECT text handed to the read-only executor).
    #[error("Query rejected: {0}")]
    Rejected(String),

    #[error("Row decoding failed: {0}")]
    Decode(String),

    /// Pool exhaustion, I/O loss, or other infrastructure failure,
    /// as opposed to the database refusing a statement.
    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl DatabaseError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, DatabaseError::Rejected(_) | DatabaseError::Query(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Unavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseError::Decode(err.to_string())
            }
            sqlx::Error::Database(db) => DatabaseError::Query(db.to_string()),
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}
