use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (database directory, bucket files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness rule was violated (duplicate username, request, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The acting user may not read or write the row.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Input rejected before touching the database.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Upload larger than the bucket accepts.
    #[error("Object too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found_or(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }

    /// Map a UNIQUE/PRIMARY KEY violation to [`StoreError::Conflict`].
    pub(crate) fn conflict_or(e: rusqlite::Error, what: &str) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(what.to_string())
            }
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
