//! OpenAI-compatible chat completions provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationService, ServiceError};
use crate::state::GenerationSettings;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatService {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl OpenAiCompatService {
    pub fn new(settings: &GenerationSettings) -> Self {
        let base_url = settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        if settings.api_key_env.is_some() && api_key.is_none() {
            log::warn!(
                "OpenAiCompat: {} is not set, sending requests without an API key",
                settings.api_key_env.as_deref().unwrap_or_default()
            );
        }

        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/v1/chat/completions", base_url),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            max_tokens: settings.max_tokens,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Map a transport failure. Timeouts stay timeouts so classification sees them.
fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Network(format!("request timeout: {}", err))
    } else if err.is_connect() || err.is_request() {
        ServiceError::Network(err.to_string())
    } else {
        ServiceError::Provider(format!("HTTP client error: {}", err))
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ServiceError {
    let detail: String = body.trim().chars().take(300).collect();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ServiceError::RateLimited(format!("HTTP 429 {}", detail))
    } else {
        ServiceError::Provider(format!("provider returned HTTP {}: {}", status.as_u16(), detail))
    }
}

fn extract_content(response: ChatResponse) -> Result<String, ServiceError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ServiceError::Provider("provider response had no content".to_string()))
}

#[async_trait]
impl GenerationService for OpenAiCompatService {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Provider(format!("Failed to parse provider response: {}", e)))?;
        extract_content(parsed)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
