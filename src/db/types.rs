//! Shared type definitions for the database layer.

use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode bullet points: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },
}

impl DbError {
    /// True when SQLite rejected a write as a duplicate (UNIQUE or PRIMARY KEY).
    /// Trigger aborts and foreign-key failures are not duplicates.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }
}

/// Result of a committed analysis write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedAnalysis {
    pub analysis: crate::types::Analysis,
    pub watermark: Option<String>,
}
