//! Generation client: the one path from the pipeline to a text-generation
//! provider.
//!
//! Every call goes through three policies, composed per attempt as
//! `retry { rate limit → timeout(call) }`:
//! - a process-wide `RateLimiter` enforcing minimum spacing between calls,
//! - a hard wall-clock timeout on each call,
//! - exponential backoff between attempts (`base * multiplier^attempt`).
//!
//! The client does not look at why an attempt failed. Classifying failures
//! for the caller happens in `error::classify_generation_failure`.

pub mod http;
pub mod pty;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::state::{AnalysisConfig, GenerationProvider, GenerationSettings};

pub use http::OpenAiCompatService;
pub use pty::ClaudeCliService;

/// Failure of a single call to a provider.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Provider(String),
}

/// Final failure after the retry budget is spent. Wraps the last attempt's error.
#[derive(Debug, Clone, Error)]
#[error("generation failed after {attempts} attempt(s): {last}")]
pub struct GenerationError {
    pub attempts: u32,
    pub last: ServiceError,
}

/// A text-generation provider: prompt in, free-form text out.
///
/// Implementations must not touch storage. A call abandoned by the client's
/// timeout may still be running in the background.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;

    /// Short provider name for logs.
    fn name(&self) -> &str {
        "generation"
    }
}

/// Minimum spacing between calls, shared by every client that holds it.
///
/// Callers queue on the inner lock, so concurrent requests are released one
/// spacing interval apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Wait until a call is allowed, then record it.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_spacing;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Upper bound on a single backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-based): 1s, 2s, 4s with
    /// defaults. Capped at `MAX_RETRY_DELAY`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(16) as i32);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl GenerationPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                multiplier: config.retry_multiplier,
            },
        }
    }
}

/// Successful generation: the raw text and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub text: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    limiter: Arc<RateLimiter>,
    policy: GenerationPolicy,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn GenerationService>,
        limiter: Arc<RateLimiter>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            service,
            limiter,
            policy,
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GenerationOutput, GenerationError> {
        let max_attempts = self.policy.retry.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let started = Instant::now();
            let result = match tokio::time::timeout(self.policy.timeout, self.service.generate(prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.policy.timeout.as_secs())),
            };

            match result {
                Ok(text) => {
                    tracing::debug!(
                        provider = self.service.name(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        chars = text.len(),
                        "generation succeeded"
                    );
                    return Ok(GenerationOutput {
                        text,
                        attempts: attempt,
                    });
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.policy.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        provider = self.service.name(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        provider = self.service.name(),
                        attempts = attempt,
                        error = %err,
                        "generation failed, retries exhausted"
                    );
                    return Err(GenerationError {
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }
}

/// Build the provider selected in config.
pub fn build_generation_service(settings: &GenerationSettings) -> Arc<dyn GenerationService> {
    match settings.provider {
        GenerationProvider::ClaudeCli => Arc::new(ClaudeCliService::new(settings)),
        GenerationProvider::OpenAiCompatible => Arc::new(OpenAiCompatService::new(settings)),
    }
}
