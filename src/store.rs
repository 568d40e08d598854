//! Persistence contract consumed by the analysis pipeline.
//!
//! `AnalysisStore` is the seam between the pipeline and storage. `SqliteStore`
//! is the production implementation: every call runs on the blocking pool
//! against one shared connection, so the async runtime never waits on SQLite.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::db::{DbError, JournalDb};
use crate::types::{
    Analysis, AnalysisEligibility, ConversationMessage, JournalEntry, ParsedAnalysis, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found: {0}")]
    NotFound(String),

    /// A write was rejected by a uniqueness or referential constraint.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("{0}")]
    Database(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_unique_violation() {
            StoreError::Constraint(err.to_string())
        } else {
            StoreError::Database(err.to_string())
        }
    }
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError>;

    /// Entries at or after the user's watermark that no analysis has
    /// consumed, oldest first.
    async fn get_unanalyzed_entries(&self, user_id: &str) -> Result<Vec<JournalEntry>, StoreError>;

    async fn get_conversation(&self, entry_id: &str) -> Result<Vec<ConversationMessage>, StoreError>;

    /// Atomically write the analysis, one link per entry, and advance the
    /// user's watermark.
    async fn create_analysis(
        &self,
        user_id: &str,
        data: &ParsedAnalysis,
        entry_ids: &[String],
    ) -> Result<Analysis, StoreError>;

    async fn get_analysis_eligibility(
        &self,
        user_id: &str,
        required_count: usize,
    ) -> Result<AnalysisEligibility, StoreError>;

    /// When the user's most recent analysis was committed, if ever.
    async fn latest_analysis_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// `AnalysisStore` over a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<JournalDb>>,
}

impl SqliteStore {
    pub fn new(db: JournalDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Shared handle for callers that need direct queries (favorites, history).
    pub fn db(&self) -> Arc<Mutex<JournalDb>> {
        Arc::clone(&self.db)
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&JournalDb) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            db.get_user(&user_id)?
                .ok_or_else(|| StoreError::NotFound(user_id.clone()))
        })
        .await
    }

    async fn get_unanalyzed_entries(&self, user_id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            let user = db
                .get_user(&user_id)?
                .ok_or_else(|| StoreError::NotFound(user_id.clone()))?;
            Ok(db.get_unanalyzed_entries(&user_id, &user.watermark())?)
        })
        .await
    }

    async fn get_conversation(&self, entry_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let entry_id = entry_id.to_string();
        self.run(move |db| Ok(db.get_conversation(&entry_id)?)).await
    }

    async fn create_analysis(
        &self,
        user_id: &str,
        data: &ParsedAnalysis,
        entry_ids: &[String],
    ) -> Result<Analysis, StoreError> {
        let user_id = user_id.to_string();
        let data = data.clone();
        let entry_ids = entry_ids.to_vec();
        self.run(move |db| {
            let committed = db.create_analysis(&user_id, &data, &entry_ids, Utc::now())?;
            log::info!(
                "AnalysisStore: committed analysis {} for {} ({} entries, watermark {})",
                committed.analysis.id,
                user_id,
                entry_ids.len(),
                committed.watermark.as_deref().unwrap_or("unchanged")
            );
            Ok(committed.analysis)
        })
        .await
    }

    async fn get_analysis_eligibility(
        &self,
        user_id: &str,
        required_count: usize,
    ) -> Result<AnalysisEligibility, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            db.get_analysis_eligibility(&user_id, required_count)?
                .ok_or_else(|| StoreError::NotFound(user_id.clone()))
        })
        .await
    }

    async fn latest_analysis_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |db| Ok(db.latest_analysis_at(&user_id)?)).await
    }
}
