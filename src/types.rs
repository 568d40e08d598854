//! Shared domain types for the analysis pipeline.
//!
//! Row types that only the SQLite layer cares about live in `db::types`;
//! everything here crosses the `AnalysisStore` boundary or is handed to the
//! HTTP layer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Format a timestamp the way every persisted timestamp is stored.
///
/// Fixed microsecond precision keeps lexical order equal to time order, which
/// the watermark comparison in SQL relies on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Rewrite any RFC 3339 timestamp into the stored form (UTC, microseconds,
/// `Z`). Unparseable input is returned unchanged so integrity checks can
/// still report it.
pub fn normalize_timestamp(raw: &str) -> String {
    parse_timestamp(raw).map_or_else(|| raw.to_string(), format_timestamp)
}

/// Watermark used when a user has never been analyzed.
pub fn epoch_watermark() -> String {
    format_timestamp(DateTime::<Utc>::UNIX_EPOCH)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    /// Entries created at or after this instant are unanalyzed.
    pub last_analysis_date: Option<String>,
}

impl User {
    pub fn watermark(&self) -> String {
        self.last_analysis_date
            .clone()
            .unwrap_or_else(epoch_watermark)
    }
}

/// A daily journal entry ("drop").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub user_id: String,
    /// The reflective question the user answered.
    pub prompt_text: Option<String>,
    /// The user's initial response.
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(MessageRole::User),
            "assistant" | "coach" => Some(MessageRole::Assistant),
            _ => None,
        }
    }

    /// Speaker label used when rendering transcripts into prompts.
    pub fn speaker_label(&self) -> &'static str {
        match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Coach",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub entry_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

/// An unanalyzed entry together with its chronological transcript.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompiledEntry {
    pub entry: JournalEntry,
    pub conversation: Vec<ConversationMessage>,
}

/// Eligibility report for one user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEligibility {
    pub is_eligible: bool,
    pub unanalyzed_count: usize,
    pub required_count: usize,
}

impl AnalysisEligibility {
    pub fn new(unanalyzed_count: usize, required_count: usize) -> Self {
        Self {
            is_eligible: unanalyzed_count >= required_count,
            unanalyzed_count,
            required_count,
        }
    }
}

/// Structured output of the response parser. Every field is always populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAnalysis {
    pub summary: String,
    pub content: String,
    pub bullet_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub user_id: String,
    pub summary: String,
    pub content: String,
    pub bullet_points: Vec<String>,
    pub is_favorited: bool,
    pub created_at: String,
}

/// Successful result of `create_analysis_for_user`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub entry_count: usize,
    pub processing_time_ms: u64,
    pub generation_attempts: u32,
}
