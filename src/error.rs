//! Error types for analysis generation
//!
//! Every pipeline failure is reported as one `AnalysisError`, which carries a
//! stable `ErrorKind` tag for the caller:
//! - Validation: not enough entries, cooldown, unknown user, provider rate limit
//! - Duplicate: an analysis for the same user is already running or committed
//! - Integrity: malformed journal history or empty generated output
//! - Network / Llm: generation service failures after retries are exhausted
//! - Database: the final commit failed

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::analysis::history::IntegrityError;
use crate::generation::GenerationError;

/// Stable tag surfaced to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Duplicate,
    Integrity,
    Network,
    Llm,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Network => "network",
            ErrorKind::Llm => "llm",
            ErrorKind::Database => "database",
        }
    }
}

/// Error types for one `create_analysis_for_user` run
#[derive(Debug, Error)]
pub enum AnalysisError {
    // Validation
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Not enough new entries for an analysis: {current} of {required}")]
    InsufficientEntries { current: usize, required: usize },

    #[error("An analysis was created recently. Try again in {} minute(s)", .remaining_secs.div_ceil(60))]
    CooldownActive { remaining_secs: u64 },

    #[error("Generation service is rate limiting requests: {0}")]
    RateLimited(GenerationError),

    // Duplicate
    #[error("An analysis is already being generated for this user")]
    AlreadyInProgress,

    #[error("These entries were already included in another analysis: {0}")]
    Conflict(String),

    // Integrity
    #[error("Journal history failed integrity checks: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Generated analysis is missing its {0}")]
    EmptyOutput(&'static str),

    // Generation
    #[error("Could not reach the generation service: {0}")]
    Network(GenerationError),

    #[error("Analysis generation failed: {0}")]
    Llm(GenerationError),

    // Persistence
    #[error("Database error: {0}")]
    Database(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::UserNotFound(_)
            | AnalysisError::InsufficientEntries { .. }
            | AnalysisError::CooldownActive { .. }
            | AnalysisError::RateLimited(_) => ErrorKind::Validation,
            AnalysisError::AlreadyInProgress | AnalysisError::Conflict(_) => ErrorKind::Duplicate,
            AnalysisError::Integrity(_) | AnalysisError::EmptyOutput(_) => ErrorKind::Integrity,
            AnalysisError::Network(_) => ErrorKind::Network,
            AnalysisError::Llm(_) => ErrorKind::Llm,
            AnalysisError::Database(_) => ErrorKind::Database,
        }
    }

    /// Returns true if the same request may succeed later without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::CooldownActive { .. }
                | AnalysisError::RateLimited(_)
                | AnalysisError::AlreadyInProgress
                | AnalysisError::Network(_)
                | AnalysisError::Llm(_)
                | AnalysisError::Database(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AnalysisError::UserNotFound(_) => "Sign in again and retry.",
            AnalysisError::InsufficientEntries { .. } => {
                "Answer a few more daily prompts to unlock your next analysis."
            }
            AnalysisError::CooldownActive { .. } => "Wait a little while and try again.",
            AnalysisError::RateLimited(_) => "The AI service is busy. Wait a few minutes and try again.",
            AnalysisError::AlreadyInProgress => {
                "Your analysis is already being generated. Check back shortly."
            }
            AnalysisError::Conflict(_) => "Refresh to see your latest analysis.",
            AnalysisError::Integrity(_) | AnalysisError::EmptyOutput(_) => {
                "Something looked wrong with your entries. The issue has been logged."
            }
            AnalysisError::Network(_) => "Check your connection and try again.",
            AnalysisError::Llm(_) => "The AI service could not produce an analysis. Try again later.",
            AnalysisError::Database(_) => "Your analysis could not be saved. Try again.",
        }
    }

    /// Structured details for the caller (counts, wait time, attempts).
    pub fn metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        match self {
            AnalysisError::UserNotFound(user_id) => {
                meta.insert("userId".into(), Value::from(user_id.as_str()));
            }
            AnalysisError::InsufficientEntries { current, required } => {
                meta.insert("currentCount".into(), Value::from(*current));
                meta.insert("requiredCount".into(), Value::from(*required));
            }
            AnalysisError::CooldownActive { remaining_secs } => {
                meta.insert("remainingSeconds".into(), Value::from(*remaining_secs));
            }
            AnalysisError::RateLimited(err) | AnalysisError::Network(err) | AnalysisError::Llm(err) => {
                meta.insert("attempts".into(), Value::from(err.attempts));
            }
            AnalysisError::Integrity(err) => {
                if let Some(entry_id) = err.entry_id() {
                    meta.insert("entryId".into(), Value::from(entry_id));
                }
            }
            AnalysisError::EmptyOutput(field) => {
                meta.insert("field".into(), Value::from(*field));
            }
            AnalysisError::AlreadyInProgress
            | AnalysisError::Conflict(_)
            | AnalysisError::Database(_) => {}
        }
        meta
    }
}

/// Classify a generation failure by inspecting its message.
///
/// Providers report failures as free text, so this is a substring heuristic:
/// timeout and connectivity wording map to `Network`, rate-limit wording maps
/// to `Validation`, anything else is `Llm`. Keep all sniffing here.
pub fn classify_generation_failure(err: &GenerationError) -> ErrorKind {
    let message = err.to_string().to_lowercase();

    const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];
    const NETWORK_MARKERS: &[&str] = &[
        "network",
        "connection",
        "connect error",
        "econnrefused",
        "econnreset",
        "dns",
        "unreachable",
    ];
    const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate_limit", "too many requests", "429"];

    if TIMEOUT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::Network
    } else if NETWORK_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::Network
    } else if RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::Validation
    } else {
        ErrorKind::Llm
    }
}

impl From<GenerationError> for AnalysisError {
    fn from(err: GenerationError) -> Self {
        match classify_generation_failure(&err) {
            ErrorKind::Network => AnalysisError::Network(err),
            ErrorKind::Validation => AnalysisError::RateLimited(err),
            _ => AnalysisError::Llm(err),
        }
    }
}

/// Serializable failure representation for the HTTP layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub can_retry: bool,
    pub recovery_suggestion: String,
    pub metadata: Map<String, Value>,
}

impl From<&AnalysisError> for AnalysisFailure {
    fn from(err: &AnalysisError) -> Self {
        AnalysisFailure {
            kind: err.kind(),
            message: err.to_string(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            metadata: err.metadata(),
        }
    }
}
