//! History compiler: unanalyzed entries plus their coach transcripts.
//!
//! A single malformed entry aborts the whole compile. Analyses cover many
//! entries, and a bad record would quietly degrade all of them.

use thiserror::Error;

use super::{MIN_ENTRIES_FOR_ANALYSIS, MIN_ENTRY_TEXT_CHARS};
use crate::store::{AnalysisStore, StoreError};
use crate::types::{parse_timestamp, CompiledEntry, JournalEntry};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("no unanalyzed entries to compile")]
    Empty,

    #[error("only {found} entries available, {required} required")]
    TooFewEntries { found: usize, required: usize },

    #[error("entry {entry_id} is missing required field '{field}'")]
    MissingField { entry_id: String, field: &'static str },

    #[error("entry {entry_id} belongs to user '{owner}', expected '{expected}'")]
    ForeignEntry {
        entry_id: String,
        owner: String,
        expected: String,
    },

    #[error("entry {entry_id} text is too short ({length} < {minimum} characters)")]
    TextTooShort {
        entry_id: String,
        length: usize,
        minimum: usize,
    },

    #[error("entry {entry_id} has an unparseable timestamp '{raw}'")]
    BadTimestamp { entry_id: String, raw: String },
}

impl IntegrityError {
    /// The offending entry, when the failure is about one entry.
    pub fn entry_id(&self) -> Option<&str> {
        match self {
            IntegrityError::MissingField { entry_id, .. }
            | IntegrityError::ForeignEntry { entry_id, .. }
            | IntegrityError::TextTooShort { entry_id, .. }
            | IntegrityError::BadTimestamp { entry_id, .. } => Some(entry_id),
            IntegrityError::Empty | IntegrityError::TooFewEntries { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Failed to load journal history: {0}")]
    Store(#[from] StoreError),
}

/// Load the user's unanalyzed entries (oldest first), attach each entry's
/// transcript, and validate the result.
pub async fn compile_history(
    store: &dyn AnalysisStore,
    user_id: &str,
) -> Result<Vec<CompiledEntry>, HistoryError> {
    let entries = store.get_unanalyzed_entries(user_id).await?;

    let mut compiled = Vec::with_capacity(entries.len());
    for entry in entries {
        let conversation = store.get_conversation(&entry.id).await?;
        compiled.push(CompiledEntry {
            entry,
            conversation,
        });
    }

    validate_history(user_id, &mut compiled)?;

    log::debug!(
        "HistoryCompiler: compiled {} entries ({} messages) for {}",
        compiled.len(),
        compiled.iter().map(|c| c.conversation.len()).sum::<usize>(),
        user_id
    );
    Ok(compiled)
}

/// Integrity checks over a compiled history. Sorts it oldest → newest.
pub fn validate_history(user_id: &str, compiled: &mut [CompiledEntry]) -> Result<(), IntegrityError> {
    if compiled.is_empty() {
        return Err(IntegrityError::Empty);
    }
    if compiled.len() < MIN_ENTRIES_FOR_ANALYSIS {
        return Err(IntegrityError::TooFewEntries {
            found: compiled.len(),
            required: MIN_ENTRIES_FOR_ANALYSIS,
        });
    }

    for item in compiled.iter() {
        validate_entry(user_id, &item.entry)?;
    }

    // Timestamps all parse at this point
    compiled.sort_by_key(|item| parse_timestamp(&item.entry.created_at));
    for item in compiled.iter_mut() {
        item.conversation
            .sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
    Ok(())
}

fn validate_entry(user_id: &str, entry: &JournalEntry) -> Result<(), IntegrityError> {
    let label = if entry.id.trim().is_empty() {
        "<unknown>".to_string()
    } else {
        entry.id.clone()
    };
    let missing = |field: &'static str| IntegrityError::MissingField {
        entry_id: label.clone(),
        field,
    };

    if entry.id.trim().is_empty() {
        return Err(missing("id"));
    }
    if entry.user_id.trim().is_empty() {
        return Err(missing("userId"));
    }
    if entry.content.trim().is_empty() {
        return Err(missing("text"));
    }
    if entry.created_at.trim().is_empty() {
        return Err(missing("createdAt"));
    }

    if entry.user_id != user_id {
        return Err(IntegrityError::ForeignEntry {
            entry_id: label,
            owner: entry.user_id.clone(),
            expected: user_id.to_string(),
        });
    }

    let length = entry.content.trim().chars().count();
    if length < MIN_ENTRY_TEXT_CHARS {
        return Err(IntegrityError::TextTooShort {
            entry_id: label,
            length,
            minimum: MIN_ENTRY_TEXT_CHARS,
        });
    }

    if parse_timestamp(&entry.created_at).is_none() {
        return Err(IntegrityError::BadTimestamp {
            entry_id: label,
            raw: entry.created_at.clone(),
        });
    }

    Ok(())
}
