//! Runtime configuration and process-wide wiring.
//!
//! Config lives at `~/.dropcoach/config.json`. Every field has a default, so
//! a missing file (or a partial one) is fine; a malformed file is an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisOrchestrator;
use crate::db::JournalDb;
use crate::generation::{build_generation_service, GenerationClient, GenerationPolicy, RateLimiter};
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GenerationProvider {
    #[default]
    ClaudeCli,
    OpenAiCompatible,
}

/// Which provider to call and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    #[serde(default)]
    pub provider: GenerationProvider,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for `openAiCompatible` (e.g. `http://localhost:11434`).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::default(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_min_request_spacing_ms() -> u64 {
    1_000
}

fn default_cooldown_minutes() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Overrides `~/.dropcoach/dropcoach.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_min_request_spacing_ms")]
    pub min_request_spacing_ms: u64,
    /// Minimum time between successful analyses for one user.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            generation: GenerationSettings::default(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            min_request_spacing_ms: default_min_request_spacing_ms(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

impl AnalysisConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60))
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.retry_multiplier.is_finite() || self.retry_multiplier <= 1.0 {
            return Err(format!(
                "retryMultiplier must be greater than 1.0, got {}",
                self.retry_multiplier
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeoutSecs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Location of the config file
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".dropcoach").join("config.json"))
}

/// Load configuration from ~/.dropcoach/config.json
pub fn load_config() -> Result<AnalysisConfig, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<AnalysisConfig, String> {
    if !path.exists() {
        log::info!("Config: {} not found, using defaults", path.display());
        return Ok(AnalysisConfig::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: AnalysisConfig =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
    config.validate()?;

    Ok(config)
}

/// Open the database named by config (or the default location).
pub fn open_database(config: &AnalysisConfig) -> Result<JournalDb, String> {
    let db = match &config.database_path {
        Some(path) => JournalDb::open_at(PathBuf::from(path)),
        None => JournalDb::open(),
    };
    db.map_err(|e| format!("Failed to open database: {}", e))
}

/// Wire store, provider, rate limiter and orchestrator from config.
///
/// The rate limiter is created here once; every client built from this
/// state shares it.
pub struct AppState {
    pub config: AnalysisConfig,
    pub store: SqliteStore,
    pub limiter: Arc<RateLimiter>,
    pub orchestrator: AnalysisOrchestrator,
}

impl AppState {
    pub fn init(config: AnalysisConfig) -> Result<Self, String> {
        let store = SqliteStore::new(open_database(&config)?);
        let limiter = Arc::new(RateLimiter::new(config.min_request_spacing()));
        let client = GenerationClient::new(
            build_generation_service(&config.generation),
            Arc::clone(&limiter),
            GenerationPolicy::from_config(&config),
        );
        let orchestrator =
            AnalysisOrchestrator::new(Arc::new(store.clone()), client).with_cooldown(config.cooldown());

        Ok(Self {
            config,
            store,
            limiter,
            orchestrator,
        })
    }
}
