//! In-memory doubles for pipeline tests: an `AnalysisStore` with fault
//! injection and a scripted `GenerationService`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::db::analyses::next_watermark;
use crate::generation::{GenerationService, ServiceError};
use crate::store::{AnalysisStore, StoreError};
use crate::types::{
    format_timestamp, parse_timestamp, Analysis, AnalysisEligibility, ConversationMessage,
    JournalEntry, MessageRole, ParsedAnalysis, User,
};

/// A well-formed entry dated `2026-05-<day>T08:00Z`.
pub fn sample_entry(id: &str, user_id: &str, day: u32) -> JournalEntry {
    JournalEntry {
        id: id.to_string(),
        user_id: user_id.to_string(),
        prompt_text: Some("What stood out to you today?".to_string()),
        content: format!("Day {}: I ended the day feeling more focused than usual.", day),
        created_at: format!("2026-05-{:02}T08:00:00.000000Z", day),
    }
}

/// Well-formed model output in the requested format.
pub const GOOD_RESPONSE: &str = "SUMMARY: You are finding focus by protecting your mornings.\n\n\
ANALYSIS:\n\
Focus came up in almost every entry.\n\n\
Your tone moved from rushed to deliberate.\n\n\
Keep experimenting with one protected block a day.\n\n\
INSIGHTS:\n\
- Mornings are your best thinking time\n\
- Saying no got easier\n\
- Small rituals anchor your day\n";

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, User>,
    entries: Vec<JournalEntry>,
    messages: Vec<ConversationMessage>,
    analyses: Vec<(Analysis, Vec<String>)>,
    next_seq: i64,
    fail_commit: Option<StoreError>,
    fail_reads: bool,
}

/// `AnalysisStore` over plain collections, with the same commit rules as
/// `SqliteStore` (ownership check, one analysis per entry, watermark advance).
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        self.inner.lock().users.insert(
            user_id.to_string(),
            User {
                id: user_id.to_string(),
                display_name: None,
                last_analysis_date: None,
            },
        );
    }

    /// Append `count` entries, each one hour after the previous, starting
    /// 2026-05-01T08:00Z. Returns their ids, oldest first.
    pub fn add_entries(&self, user_id: &str, count: usize) -> Vec<String> {
        let mut inner = self.inner.lock();
        let base = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).single().unwrap_or_default();
        (0..count)
            .map(|_| {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                let id = format!("{}-e{}", user_id, seq);
                inner.entries.push(JournalEntry {
                    id: id.clone(),
                    user_id: user_id.to_string(),
                    prompt_text: Some("What stood out to you today?".to_string()),
                    content: format!("Entry {}: a quiet morning walk helped me think.", seq),
                    created_at: format_timestamp(base + chrono::Duration::hours(seq)),
                });
                id
            })
            .collect()
    }

    pub fn add_raw_entry(&self, entry: JournalEntry) {
        self.inner.lock().entries.push(entry);
    }

    pub fn add_message(&self, entry_id: &str, role: MessageRole, content: &str) {
        let mut inner = self.inner.lock();
        let created_at = inner
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .and_then(|e| parse_timestamp(&e.created_at))
            .unwrap_or_default();
        let offset = inner.messages.iter().filter(|m| m.entry_id == entry_id).count() as i64;
        let id = format!("{}-m{}", entry_id, offset);
        inner.messages.push(ConversationMessage {
            id,
            entry_id: entry_id.to_string(),
            role,
            content: content.to_string(),
            created_at: format_timestamp(created_at + chrono::Duration::minutes(offset + 1)),
        });
    }

    pub fn set_watermark(&self, user_id: &str, watermark: DateTime<Utc>) {
        if let Some(user) = self.inner.lock().users.get_mut(user_id) {
            user.last_analysis_date = Some(format_timestamp(watermark));
        }
    }

    /// Mark every existing entry of the user as analyzed.
    pub fn advance_watermark_past_all(&self, user_id: &str) {
        let newest = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter_map(|e| parse_timestamp(&e.created_at))
            .max();
        if let Some(newest) = newest {
            self.set_watermark(user_id, newest + chrono::Duration::microseconds(1));
        }
    }

    /// Record an analysis committed at `created_at` that consumed no entries.
    pub fn add_past_analysis(&self, user_id: &str, created_at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let analysis = Analysis {
            id: format!("analysis-{}", inner.analyses.len() + 1),
            user_id: user_id.to_string(),
            summary: "Earlier analysis".to_string(),
            content: "Earlier body".to_string(),
            bullet_points: Vec::new(),
            is_favorited: false,
            created_at: format_timestamp(created_at),
        };
        inner.analyses.push((analysis, Vec::new()));
    }

    /// The next `create_analysis` fails with `err` and writes nothing.
    pub fn fail_next_commit(&self, err: StoreError) {
        self.inner.lock().fail_commit = Some(err);
    }

    /// Every read fails with a database error.
    pub fn fail_reads(&self) {
        self.inner.lock().fail_reads = true;
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.inner.lock().users.get(user_id).cloned()
    }

    pub fn analyses(&self) -> Vec<Analysis> {
        self.inner.lock().analyses.iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn linked_entries(&self, analysis_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .analyses
            .iter()
            .find(|(a, _)| a.id == analysis_id)
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default()
    }

    fn check_reads(inner: &MemoryInner) -> Result<(), StoreError> {
        if inner.fail_reads {
            Err(StoreError::Database("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    /// Same rule as the SQL filter: at or after the watermark by time, not
    /// linked to any analysis. Unparseable timestamps count as unanalyzed.
    fn unanalyzed(inner: &MemoryInner, user: &User) -> Vec<JournalEntry> {
        let watermark = user.last_analysis_date.as_deref().and_then(parse_timestamp);
        let mut entries: Vec<JournalEntry> = inner
            .entries
            .iter()
            .filter(|e| e.user_id == user.id)
            .filter(|e| !inner.analyses.iter().any(|(_, ids)| ids.contains(&e.id)))
            .filter(|e| match (parse_timestamp(&e.created_at), watermark) {
                (Some(ts), Some(mark)) => ts >= mark,
                _ => true,
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| (parse_timestamp(&e.created_at), e.id.clone()));
        entries
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError> {
        let inner = self.inner.lock();
        Self::check_reads(&inner)?;
        inner
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    async fn get_unanalyzed_entries(&self, user_id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        let inner = self.inner.lock();
        Self::check_reads(&inner)?;
        let user = inner
            .users
            .get(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        Ok(Self::unanalyzed(&inner, user))
    }

    async fn get_conversation(&self, entry_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let inner = self.inner.lock();
        Self::check_reads(&inner)?;
        let mut messages: Vec<ConversationMessage> = inner
            .messages
            .iter()
            .filter(|m| m.entry_id == entry_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn create_analysis(
        &self,
        user_id: &str,
        data: &ParsedAnalysis,
        entry_ids: &[String],
    ) -> Result<Analysis, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_commit.take() {
            return Err(err);
        }
        if !inner.users.contains_key(user_id) {
            return Err(StoreError::NotFound(user_id.to_string()));
        }

        let mut newest: Option<DateTime<Utc>> = None;
        for entry_id in entry_ids {
            let entry = inner
                .entries
                .iter()
                .find(|e| &e.id == entry_id && e.user_id == user_id)
                .ok_or_else(|| {
                    StoreError::Database(format!("entry {} does not belong to {}", entry_id, user_id))
                })?;
            if inner.analyses.iter().any(|(_, ids)| ids.contains(entry_id)) {
                return Err(StoreError::Constraint(format!(
                    "UNIQUE constraint failed: analysis_entries.entry_id ({})",
                    entry_id
                )));
            }
            newest = newest.max(parse_timestamp(&entry.created_at));
        }

        let now = Utc::now();
        let analysis = Analysis {
            id: format!("analysis-{}", inner.analyses.len() + 1),
            user_id: user_id.to_string(),
            summary: data.summary.clone(),
            content: data.content.clone(),
            bullet_points: data.bullet_points.clone(),
            is_favorited: false,
            created_at: format_timestamp(now),
        };
        if let Some(user) = inner.users.get_mut(user_id) {
            let previous = user.last_analysis_date.as_deref().and_then(parse_timestamp);
            if let Some(watermark) = next_watermark(previous, newest) {
                user.last_analysis_date = Some(format_timestamp(watermark));
            }
        }
        inner.analyses.push((analysis.clone(), entry_ids.to_vec()));
        Ok(analysis)
    }

    async fn get_analysis_eligibility(
        &self,
        user_id: &str,
        required_count: usize,
    ) -> Result<AnalysisEligibility, StoreError> {
        let inner = self.inner.lock();
        Self::check_reads(&inner)?;
        let user = inner
            .users
            .get(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        Ok(AnalysisEligibility::new(
            Self::unanalyzed(&inner, user).len(),
            required_count,
        ))
    }

    async fn latest_analysis_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.lock();
        Self::check_reads(&inner)?;
        Ok(inner
            .analyses
            .iter()
            .filter(|(a, _)| a.user_id == user_id)
            .filter_map(|(a, _)| parse_timestamp(&a.created_at))
            .max())
    }
}

/// One scripted reaction of `ScriptedService`.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail(ServiceError),
    /// Never answers within any reasonable timeout.
    Hang(Duration),
    /// Answers after a delay.
    Slow(Duration, String),
}

/// `GenerationService` that plays back a script and records every call.
pub struct ScriptedService {
    script: Mutex<VecDeque<Script>>,
    fallback: Option<Script>,
    calls: Mutex<Vec<Instant>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Repeat the same reaction forever.
    pub fn always(reaction: Script) -> Self {
        Self {
            fallback: Some(reaction),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        self.calls.lock().push(Instant::now());
        self.prompts.lock().push(prompt.to_string());

        let next = self.script.lock().pop_front().or_else(|| self.fallback.clone());
        match next {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok("late reply".to_string())
            }
            Some(Script::Slow(duration, text)) => {
                tokio::time::sleep(duration).await;
                Ok(text)
            }
            None => Err(ServiceError::Provider("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
