//! Claude CLI provider.
//!
//! Runs `claude --print <prompt>` inside a pseudo-terminal, because the CLI
//! expects an interactive terminal. The blocking process work happens on the
//! blocking pool; the client's timeout races it from the async side, and the
//! process has its own kill deadline so an abandoned call cannot linger.

use std::io::Read;
use std::process::Command;
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, NativePtySystem, PtySize, PtySystem};
use regex::Regex;

use super::{GenerationService, ServiceError};
use crate::state::GenerationSettings;

/// Hard deadline for one CLI run. Kept above the client timeout so the
/// client gives up first and this only reaps stragglers.
pub const DEFAULT_CLI_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ClaudeCliService {
    model: Option<String>,
    timeout_secs: u64,
}

impl ClaudeCliService {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            model: settings.model.clone(),
            timeout_secs: DEFAULT_CLI_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Check if Claude CLI is on PATH
    pub fn is_available() -> bool {
        Command::new("which")
            .arg("claude")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl GenerationService for ClaudeCliService {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let prompt = prompt.to_string();
        let model = self.model.clone();
        let timeout_secs = self.timeout_secs;
        tokio::task::spawn_blocking(move || run_claude(&prompt, model.as_deref(), timeout_secs))
            .await
            .map_err(|e| ServiceError::Provider(format!("Claude CLI task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "claude-cli"
    }
}

fn run_claude(prompt: &str, model: Option<&str>, timeout_secs: u64) -> Result<String, ServiceError> {
    if !ClaudeCliService::is_available() {
        return Err(ServiceError::Provider(
            "Claude CLI not found. Install it and run `claude login`.".to_string(),
        ));
    }

    let pty_system = NativePtySystem::default();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| ServiceError::Provider(format!("Failed to open PTY: {}", e)))?;

    let mut cmd = CommandBuilder::new("claude");
    if let Some(model) = model {
        cmd.args(["--model", model]);
    }
    cmd.args(["--print", prompt]);

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| ServiceError::Provider(format!("Failed to spawn claude: {}", e)))?;

    // Drop the slave so the reader sees EOF when the child exits
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ServiceError::Provider(format!("Failed to clone PTY reader: {}", e)))?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        let _ = tx.send(bytes);
    });

    let bytes = match rx.recv_timeout(Duration::from_secs(timeout_secs)) {
        Ok(bytes) => bytes,
        Err(_) => {
            log::warn!("ClaudeCli: no exit after {}s, killing process", timeout_secs);
            let _ = child.kill();
            return Err(ServiceError::Timeout(timeout_secs));
        }
    };

    let status = child.wait().ok();
    let output = strip_ansi(&String::from_utf8_lossy(&bytes));

    if let Some(status) = status.filter(|s| !s.success()) {
        if output.trim().is_empty() {
            return Err(ServiceError::Provider(format!(
                "claude exited with code {}",
                status.exit_code()
            )));
        }
    }

    classify_output(output)
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid ANSI regex")
    })
}

/// Remove terminal escape sequences and carriage returns added by the PTY.
fn strip_ansi(raw: &str) -> String {
    ansi_re().replace_all(raw, "").replace('\r', "")
}

/// Map known CLI failure text to a classified error; anything else is output.
fn classify_output(output: String) -> Result<String, ServiceError> {
    let lower = output.to_lowercase();

    if lower.contains("not authenticated")
        || lower.contains("please login")
        || lower.contains("please log in")
        || lower.contains("login required")
    {
        return Err(ServiceError::Provider(
            "Claude CLI is not authenticated. Run `claude login`.".to_string(),
        ));
    }

    if lower.contains("rate limit") || lower.contains("too many requests") {
        return Err(ServiceError::RateLimited("Claude CLI reported a rate limit".to_string()));
    }

    if lower.contains("subscription") && lower.contains("limit") {
        return Err(ServiceError::RateLimited(
            "Claude subscription usage limit reached".to_string(),
        ));
    }

    if output.trim().is_empty() {
        return Err(ServiceError::Provider("Claude CLI returned no output".to_string()));
    }

    Ok(output.trim().to_string())
}
