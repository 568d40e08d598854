//! Analysis orchestrator: one call drives one user's pipeline end to end.
//!
//! `Idle → Validating → Compiling → Generating → Persisting → Done`, with
//! `Failed` reachable from every non-terminal stage. Each stage fails fast
//! with one classified `AnalysisError`. Nothing is written until the final
//! atomic commit, so every failure leaves storage as it was.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use tracing::Instrument;

use super::eligibility::{evaluate_eligibility, EligibilityError};
use super::history::{compile_history, HistoryError};
use super::parser::parse_analysis_response;
use super::prompts::build_analysis_prompt;
use crate::error::{AnalysisError, AnalysisFailure};
use crate::generation::GenerationClient;
use crate::store::{AnalysisStore, StoreError};
use crate::types::{AnalysisEligibility, AnalysisOutcome, ParsedAnalysis};

/// Default minimum time between successful analyses for one user.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Idle,
    Validating,
    Compiling,
    Generating,
    Persisting,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Validating => "validating",
            PipelineStage::Compiling => "compiling",
            PipelineStage::Generating => "generating",
            PipelineStage::Persisting => "persisting",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Users with an analysis currently in flight.
///
/// Cloning shares the set, so one instance can back several orchestrators.
#[derive(Debug, Clone, Default)]
pub struct InFlightUsers {
    users: Arc<DashSet<String>>,
}

impl InFlightUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `user_id`, or `None` if a run for that user is already in flight.
    pub fn try_acquire(&self, user_id: &str) -> Option<InFlightGuard> {
        if self.users.insert(user_id.to_string()) {
            Some(InFlightGuard {
                users: Arc::clone(&self.users),
                user_id: user_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Releases the user's in-flight claim when dropped, on every exit path.
#[derive(Debug)]
pub struct InFlightGuard {
    users: Arc<DashSet<String>>,
    user_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.users.remove(&self.user_id);
    }
}

/// Reject output the parser filled but that is still blank.
pub fn ensure_presentable(parsed: &ParsedAnalysis) -> Result<(), AnalysisError> {
    if parsed.summary.trim().is_empty() {
        return Err(AnalysisError::EmptyOutput("summary"));
    }
    if parsed.content.trim().is_empty() {
        return Err(AnalysisError::EmptyOutput("content"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    store: Arc<dyn AnalysisStore>,
    client: GenerationClient,
    in_flight: InFlightUsers,
    cooldown: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(store: Arc<dyn AnalysisStore>, client: GenerationClient) -> Self {
        Self {
            store,
            client,
            in_flight: InFlightUsers::new(),
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Share an in-flight set with other orchestrators.
    pub fn with_in_flight(mut self, in_flight: InFlightUsers) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> &InFlightUsers {
        &self.in_flight
    }

    /// Eligibility report without running the pipeline.
    pub async fn eligibility(&self, user_id: &str) -> Result<AnalysisEligibility, AnalysisError> {
        evaluate_eligibility(self.store.as_ref(), user_id)
            .await
            .map_err(|e| match e {
                EligibilityError::NotFound(id) => AnalysisError::UserNotFound(id),
                EligibilityError::Store(err) => AnalysisError::Database(err.to_string()),
            })
    }

    /// Run the full pipeline for one user.
    pub async fn create_analysis_for_user(&self, user_id: &str) -> Result<AnalysisOutcome, AnalysisError> {
        self.run_tracked(user_id).await.map_err(|(err, _)| err)
    }

    /// Same as `create_analysis_for_user`, with failures in the serializable
    /// form the HTTP layer returns (`metadata.stage` names where it stopped).
    pub async fn run(&self, user_id: &str) -> Result<AnalysisOutcome, AnalysisFailure> {
        self.run_tracked(user_id).await.map_err(|(err, stage)| {
            let mut failure = AnalysisFailure::from(&err);
            failure
                .metadata
                .insert("stage".into(), serde_json::Value::from(stage.as_str()));
            failure
        })
    }

    async fn run_tracked(
        &self,
        user_id: &str,
    ) -> Result<AnalysisOutcome, (AnalysisError, PipelineStage)> {
        let span = tracing::info_span!("analysis", user_id = %user_id);
        let mut stage = PipelineStage::Idle;

        match self.execute(user_id, &mut stage).instrument(span.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                span.in_scope(|| {
                    tracing::warn!(
                        stage = PipelineStage::Failed.as_str(),
                        failed_at = stage.as_str(),
                        kind = err.kind().as_str(),
                        error = %err,
                        "analysis failed"
                    );
                });
                Err((err, stage))
            }
        }
    }

    async fn execute(
        &self,
        user_id: &str,
        stage: &mut PipelineStage,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = std::time::Instant::now();

        enter(stage, PipelineStage::Validating);
        let _guard = self
            .in_flight
            .try_acquire(user_id)
            .ok_or(AnalysisError::AlreadyInProgress)?;

        let eligibility = self.eligibility(user_id).await?;
        if !eligibility.is_eligible {
            return Err(AnalysisError::InsufficientEntries {
                current: eligibility.unanalyzed_count,
                required: eligibility.required_count,
            });
        }

        let last_success = self
            .store
            .latest_analysis_at(user_id)
            .await
            .map_err(store_read_error)?;
        self.check_cooldown(last_success)?;

        enter(stage, PipelineStage::Compiling);
        let history = compile_history(self.store.as_ref(), user_id)
            .await
            .map_err(|e| match e {
                HistoryError::Integrity(err) => AnalysisError::Integrity(err),
                HistoryError::Store(err) => store_read_error(err),
            })?;

        enter(stage, PipelineStage::Generating);
        let prompt = build_analysis_prompt(&history);
        let output = self.client.generate(&prompt).await?;
        let parsed = parse_analysis_response(&output.text);
        ensure_presentable(&parsed)?;

        enter(stage, PipelineStage::Persisting);
        let entry_ids: Vec<String> = history.iter().map(|c| c.entry.id.clone()).collect();
        let analysis = self
            .store
            .create_analysis(user_id, &parsed, &entry_ids)
            .await
            .map_err(|e| match e {
                StoreError::Constraint(msg) => AnalysisError::Conflict(msg),
                other => AnalysisError::Database(other.to_string()),
            })?;

        enter(stage, PipelineStage::Done);
        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            analysis_id = %analysis.id,
            entries = entry_ids.len(),
            attempts = output.attempts,
            processing_time_ms,
            "analysis committed"
        );

        Ok(AnalysisOutcome {
            analysis,
            entry_count: entry_ids.len(),
            processing_time_ms,
            generation_attempts: output.attempts,
        })
    }

    /// Reject a run while the user's last committed analysis is younger than
    /// the cooldown.
    fn check_cooldown(&self, last_success: Option<DateTime<Utc>>) -> Result<(), AnalysisError> {
        if self.cooldown.is_zero() {
            return Ok(());
        }
        let Some(last) = last_success else {
            return Ok(());
        };

        let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.cooldown {
            return Ok(());
        }
        let remaining = self.cooldown - elapsed;
        let remaining_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        Err(AnalysisError::CooldownActive { remaining_secs })
    }
}

fn enter(stage: &mut PipelineStage, next: PipelineStage) {
    tracing::debug!(from = stage.as_str(), to = next.as_str(), "stage transition");
    *stage = next;
}

fn store_read_error(err: StoreError) -> AnalysisError {
    match err {
        StoreError::NotFound(id) => AnalysisError::UserNotFound(id),
        other => AnalysisError::Database(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::generation::{
        GenerationPolicy, GenerationService, RateLimiter, RetryPolicy, ServiceError,
    };
    use crate::test_utils::{sample_entry, MemoryStore, Script, ScriptedService, GOOD_RESPONSE};
    use chrono::Duration as ChronoDuration;
    use tracing_test::traced_test;

    fn orchestrator(store: Arc<MemoryStore>, service: Arc<dyn GenerationService>) -> AnalysisOrchestrator {
        let client = GenerationClient::new(
            service,
            Arc::new(RateLimiter::new(Duration::ZERO)),
            GenerationPolicy {
                timeout: Duration::from_secs(30),
                retry: RetryPolicy {
                    max_retries: 2,
                    base_delay: Duration::from_secs(1),
                    multiplier: 2.0,
                },
            },
        );
        AnalysisOrchestrator::new(store, client)
    }

    fn store_with_entries(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_user("u1");
        store.add_entries("u1", count);
        store
    }

    fn replying() -> Arc<ScriptedService> {
        Arc::new(ScriptedService::always(Script::Reply(GOOD_RESPONSE.to_string())))
    }

    #[tokio::test]
    async fn test_five_entries_first_analysis() {
        let store = store_with_entries(5);
        let orch = orchestrator(store.clone(), replying());

        let outcome = orch.create_analysis_for_user("u1").await.unwrap();
        assert_eq!(outcome.entry_count, 5);
        assert_eq!(outcome.generation_attempts, 1);
        assert_eq!(store.linked_entries(&outcome.analysis.id).len(), 5);
        assert_eq!(
            outcome.analysis.summary,
            "You are finding focus by protecting your mornings."
        );
        assert_eq!(outcome.analysis.bullet_points.len(), 3);

        let eligibility = orch.eligibility("u1").await.unwrap();
        assert_eq!(eligibility.unanalyzed_count, 0);
        assert!(!eligibility.is_eligible);
        assert!(store.user("u1").unwrap().last_analysis_date.is_some());
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_covers_every_entry() {
        let store = store_with_entries(4);
        let service = replying();
        let orch = orchestrator(store, service.clone());

        orch.create_analysis_for_user("u1").await.unwrap();
        let prompts = service.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("### Entry 4"));
        assert!(!prompts[0].contains("### Entry 5"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_validation() {
        let store = Arc::new(MemoryStore::new());
        let service = replying();
        let orch = orchestrator(store, service.clone());

        let err = orch.create_analysis_for_user("ghost").await.unwrap_err();
        assert!(matches!(err, AnalysisError::UserNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_entries_reports_counts() {
        let store = store_with_entries(2);
        let service = replying();
        let orch = orchestrator(store, service.clone());

        let failure = orch.run("u1").await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Validation);
        assert_eq!(failure.metadata["currentCount"], 2);
        assert_eq!(failure.metadata["requiredCount"], 3);
        assert_eq!(failure.metadata["stage"], "validating");
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_recent_success() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("u1");
        let now = Utc::now();
        store.add_past_analysis("u1", now - ChronoDuration::minutes(10));
        for (i, minutes_ago) in [9, 8, 7].into_iter().enumerate() {
            let mut entry = sample_entry(&format!("recent-{}", i), "u1", 1);
            entry.created_at = crate::types::format_timestamp(now - ChronoDuration::minutes(minutes_ago));
            store.add_raw_entry(entry);
        }
        let orch = orchestrator(store.clone(), replying());

        let err = orch.create_analysis_for_user("u1").await.unwrap_err();
        match err {
            AnalysisError::CooldownActive { remaining_secs } => {
                assert!(remaining_secs > 19 * 60 && remaining_secs <= 20 * 60, "{}", remaining_secs);
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
        assert!(store.analyses().is_empty());

        // Disabled cooldown lets the same request through
        let orch = orchestrator(store.clone(), replying()).with_cooldown(Duration::ZERO);
        assert!(orch.create_analysis_for_user("u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_second_run_hits_cooldown() {
        let store = store_with_entries(3);
        let orch = orchestrator(store.clone(), replying());
        orch.create_analysis_for_user("u1").await.unwrap();

        // Entries written after the commit
        let now = Utc::now();
        for i in 0..3 {
            let mut entry = sample_entry(&format!("later-{}", i), "u1", 1);
            entry.created_at = crate::types::format_timestamp(now + ChronoDuration::seconds(i + 1));
            store.add_raw_entry(entry);
        }
        assert!(orch.eligibility("u1").await.unwrap().is_eligible);
        let err = orch.create_analysis_for_user("u1").await.unwrap_err();
        assert!(matches!(err, AnalysisError::CooldownActive { .. }));
        assert_eq!(store.analyses().len(), 1);
    }

    /// Writes a new drop for the user while the model is "thinking".
    struct WritesDuringGeneration {
        store: Arc<MemoryStore>,
    }

    #[async_trait::async_trait]
    impl GenerationService for WritesDuringGeneration {
        async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
            let mut entry = sample_entry("mid-run", "u1", 1);
            entry.created_at = crate::types::format_timestamp(Utc::now());
            self.store.add_raw_entry(entry);
            Ok(GOOD_RESPONSE.to_string())
        }
    }

    #[tokio::test]
    async fn test_entry_written_during_generation_is_kept_for_next_run() {
        let store = store_with_entries(3);
        let service = Arc::new(WritesDuringGeneration {
            store: store.clone(),
        });
        let orch = orchestrator(store.clone(), service);

        let outcome = orch.create_analysis_for_user("u1").await.unwrap();
        assert_eq!(outcome.entry_count, 3);
        let linked = store.linked_entries(&outcome.analysis.id);
        assert!(!linked.contains(&"mid-run".to_string()));

        let eligibility = orch.eligibility("u1").await.unwrap();
        assert_eq!(eligibility.unanalyzed_count, 1);
    }

    #[tokio::test]
    async fn test_cooldown_ignores_watermark_without_analysis() {
        let store = store_with_entries(3);
        store.set_watermark("u1", Utc::now() - ChronoDuration::minutes(1));
        for i in 0..3 {
            let mut entry = sample_entry(&format!("fresh-{}", i), "u1", 1);
            entry.created_at = crate::types::format_timestamp(Utc::now() + ChronoDuration::seconds(i + 1));
            store.add_raw_entry(entry);
        }
        let orch = orchestrator(store.clone(), replying());

        let outcome = orch.create_analysis_for_user("u1").await.unwrap();
        assert_eq!(outcome.entry_count, 3);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_integrity() {
        let store = store_with_entries(3);
        let mut short = sample_entry("short", "u1", 28);
        short.content = "meh".to_string();
        store.add_raw_entry(short);
        let service = replying();
        let orch = orchestrator(store.clone(), service.clone());

        let failure = orch.run("u1").await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Integrity);
        assert_eq!(failure.metadata["entryId"], "short");
        assert_eq!(failure.metadata["stage"], "compiling");
        assert_eq!(service.call_count(), 0);
        assert!(store.user("u1").unwrap().last_analysis_date.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_twice_then_success() {
        let store = store_with_entries(3);
        let service = Arc::new(ScriptedService::new(vec![
            Script::Hang(Duration::from_secs(300)),
            Script::Hang(Duration::from_secs(300)),
            Script::Reply(GOOD_RESPONSE.to_string()),
        ]));
        let orch = orchestrator(store.clone(), service.clone());

        let outcome = orch.create_analysis_for_user("u1").await.unwrap();
        assert_eq!(outcome.generation_attempts, 3);
        assert_eq!(service.call_count(), 3);
        assert_eq!(store.analyses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failures_are_classified() {
        let cases = [
            (ServiceError::Timeout(30), ErrorKind::Network),
            (ServiceError::Network("connection reset".into()), ErrorKind::Network),
            (ServiceError::RateLimited("HTTP 429".into()), ErrorKind::Validation),
            (ServiceError::Provider("content policy refusal".into()), ErrorKind::Llm),
        ];
        for (service_err, expected) in cases {
            let store = store_with_entries(3);
            let service = Arc::new(ScriptedService::always(Script::Fail(service_err)));
            let orch = orchestrator(store.clone(), service.clone());

            let failure = orch.run("u1").await.unwrap_err();
            assert_eq!(failure.kind, expected);
            assert_eq!(failure.metadata["attempts"], 3);
            assert_eq!(failure.metadata["stage"], "generating");
            assert_eq!(service.call_count(), 3);
            assert!(store.analyses().is_empty());
            assert!(store.user("u1").unwrap().last_analysis_date.is_none());
        }
    }

    #[tokio::test]
    async fn test_unformatted_output_still_commits_with_fallbacks() {
        let store = store_with_entries(3);
        let service = Arc::new(ScriptedService::always(Script::Reply(
            "Here are some thoughts about your week.".to_string(),
        )));
        let orch = orchestrator(store, service);

        let outcome = orch.create_analysis_for_user("u1").await.unwrap();
        assert_eq!(
            outcome.analysis.bullet_points,
            vec![crate::analysis::parser::FALLBACK_BULLET.to_string()]
        );
        assert!(!outcome.analysis.summary.is_empty());
        assert!(!outcome.analysis.content.is_empty());
    }

    #[test]
    fn test_blank_parsed_output_is_integrity() {
        let parsed = ParsedAnalysis {
            summary: "Fine".to_string(),
            content: "  ".to_string(),
            bullet_points: vec![],
        };
        let err = ensure_presentable(&parsed).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyOutput("content")));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_commit_failure_is_database_and_leaves_no_state() {
        let store = store_with_entries(3);
        store.fail_next_commit(StoreError::Database("disk I/O error".into()));
        let orch = orchestrator(store.clone(), replying());

        let failure = orch.run("u1").await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Database);
        assert_eq!(failure.metadata["stage"], "persisting");
        assert!(store.analyses().is_empty());
        assert!(store.user("u1").unwrap().last_analysis_date.is_none());
        assert_eq!(orch.eligibility("u1").await.unwrap().unanalyzed_count, 3);
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_constraint_failure_is_duplicate() {
        let store = store_with_entries(3);
        store.fail_next_commit(StoreError::Constraint(
            "UNIQUE constraint failed: analysis_entries.entry_id".into(),
        ));
        let orch = orchestrator(store.clone(), replying());

        let err = orch.create_analysis_for_user("u1").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Conflict(_)));
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn test_read_failure_is_database() {
        let store = store_with_entries(3);
        store.fail_reads();
        let orch = orchestrator(store, replying());

        let err = orch.create_analysis_for_user("u1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_for_same_user() {
        let store = store_with_entries(3);
        let service = Arc::new(ScriptedService::always(Script::Slow(
            Duration::from_secs(5),
            GOOD_RESPONSE.to_string(),
        )));
        let orch = orchestrator(store.clone(), service.clone());

        let (a, b) = tokio::join!(
            orch.create_analysis_for_user("u1"),
            orch.create_analysis_for_user("u1")
        );
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let duplicates = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(AnalysisError::AlreadyInProgress)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 1);
        assert_eq!(service.call_count(), 1);
        assert_eq!(store.analyses().len(), 1);
        assert!(orch.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_users_run_in_parallel() {
        let store = Arc::new(MemoryStore::new());
        for user in ["u1", "u2"] {
            store.add_user(user);
            store.add_entries(user, 3);
        }
        let service = Arc::new(ScriptedService::always(Script::Slow(
            Duration::from_secs(5),
            GOOD_RESPONSE.to_string(),
        )));
        let orch = orchestrator(store.clone(), service);

        let (a, b) = tokio::join!(
            orch.create_analysis_for_user("u1"),
            orch.create_analysis_for_user("u2")
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(store.analyses().len(), 2);
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let store = store_with_entries(1);
        let orch = orchestrator(store.clone(), replying());
        assert!(orch.create_analysis_for_user("u1").await.is_err());
        assert!(!orch.in_flight().contains("u1"));

        store.add_entries("u1", 2);
        assert!(orch.create_analysis_for_user("u1").await.is_ok());
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let users = InFlightUsers::new();
        let guard = users.try_acquire("u1").unwrap();
        assert!(users.try_acquire("u1").is_none());
        assert!(users.try_acquire("u2").is_some());
        drop(guard);
        assert!(users.try_acquire("u1").is_some());
    }

    #[test]
    fn test_shared_in_flight_set_spans_orchestrators() {
        let shared = InFlightUsers::new();
        let store = store_with_entries(3);
        let a = orchestrator(store.clone(), replying()).with_in_flight(shared.clone());
        let b = orchestrator(store, replying()).with_in_flight(shared.clone());

        let _held = a.in_flight().try_acquire("u1").unwrap();
        assert!(b.in_flight().contains("u1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_success_is_logged_with_user_span() {
        let store = store_with_entries(3);
        let orch = orchestrator(store, replying());
        orch.create_analysis_for_user("u1").await.unwrap();

        assert!(logs_contain("analysis committed"));
        assert!(logs_contain("user_id=u1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_is_logged_with_stage() {
        let store = store_with_entries(2);
        let orch = orchestrator(store, replying());
        let _ = orch.create_analysis_for_user("u1").await;

        assert!(logs_contain("analysis failed"));
        assert!(logs_contain("validating"));
    }
}
