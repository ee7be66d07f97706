use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Key → value source the config is resolved from.
///
/// `from_env` uses the process environment; tests hand in a map.
type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

struct Profiled<'a> {
    profile: &'a str,
    lookup: &'a Lookup<'a>,
}

impl Profiled<'_> {
    /// Tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn parsed_opt<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.opt(key).and_then(|v| v.parse().ok())
    }
}

// ── Top-level config ──────────────────────────────────────────

/// Immutable job configuration, resolved once at startup and shared by
/// reference with the scheduler and every conversation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    pub batch: BatchConfig,
    pub tools: ToolsConfig,
}

impl ExtractionConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `MAIDX_PROFILE`. When set (e.g. `LOCAL`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("MAIDX_PROFILE").unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, &|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key → value source.
    pub fn from_lookup(profile: &str, lookup: &Lookup<'_>) -> Self {
        let p = profile.to_uppercase();
        let src = Profiled {
            profile: &p,
            lookup,
        };
        Self {
            profile: p.clone(),
            llm: LlmConfig::resolve(&src),
            engine: EngineConfig::resolve(&src),
            batch: BatchConfig::resolve(&src),
            tools: ToolsConfig::resolve(&src),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Reject values the engine and scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least("BATCH_WORKERS", self.batch.workers as u64, 1)?;
        at_least("MAX_TURNS", self.engine.max_turns as u64, 1)?;
        at_least("LLM_TIMEOUT_SECS", self.llm.timeout_secs, 1)?;
        at_least("SCRIPT_TIMEOUT_MS", self.tools.script_timeout_ms, 1)?;
        at_least("SCRIPT_MAX_MEMORY_MB", self.tools.script_max_memory_mb, 16)?;
        at_least("FETCH_TIMEOUT_SECS", self.tools.fetch_timeout_secs, 1)?;
        if self.batch.retry_max_delay_ms < self.batch.retry_base_delay_ms {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_DELAY_MS",
                reason: "must not be smaller than RETRY_BASE_DELAY_MS".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid {
                key: "LLM_TEMPERATURE",
                reason: format!("{} is outside 0.0..=2.0", self.llm.temperature),
            });
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                key: "LLM_API",
                reason: format!("'{}' is not an http(s) URL", self.llm.base_url),
            });
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  llm:    endpoint={}, model={}, key={}",
            self.llm.base_url,
            self.llm.model,
            if self.llm.api_key.is_some() { "set" } else { "(none)" }
        );
        tracing::info!(
            "  engine: max_turns={}, max_corrections={}",
            self.engine.max_turns,
            self.engine.max_corrections
        );
        tracing::info!(
            "  batch:  workers={}, max_retries={}",
            self.batch.workers,
            self.batch.max_retries
        );
        tracing::info!(
            "  tools:  script={}, web_fetch={}, think={}, verify={}",
            self.tools.script_call_limit,
            self.tools.web_fetch_call_limit,
            self.tools.think_call_limit,
            self.tools.verify_call_limit
        );
    }

    /// Return a redacted view safe for writing next to batch output.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "llm": {
                "base_url": self.llm.base_url,
                "model": self.llm.model,
                "temperature": self.llm.temperature,
                "max_tokens": self.llm.max_tokens,
                "configured": self.llm.is_configured(),
            },
            "engine": self.engine,
            "batch": self.batch,
            "tools": self.tools,
        })
    }
}

fn at_least(key: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        Err(ConfigError::TooSmall { key, min, value })
    } else {
        Ok(())
    }
}

// ── LLM endpoint ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Extra HTTP headers sent with every request.
    #[serde(skip_serializing, default)]
    pub headers: BTreeMap<String, String>,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn resolve(src: &Profiled<'_>) -> Self {
        let headers = src
            .opt("LLM_HEADERS")
            .and_then(|raw| match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!(error = %e, "LLM_HEADERS is not a JSON object of strings, ignoring");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            base_url: src.or("LLM_API", "https://api.openai.com/v1"),
            api_key: src.opt("LLM_KEY"),
            model: src.or("LLM_MODEL", "gpt-4o-mini"),
            headers,
            temperature: src.parsed("LLM_TEMPERATURE", 0.0),
            top_p: src.parsed_opt("LLM_TOP_P"),
            max_tokens: src.parsed("LLM_MAX_TOKENS", 4096),
            timeout_secs: src.parsed("LLM_TIMEOUT_SECS", 120),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() || !self.base_url.contains("api.openai.com")
    }
}

// ── Conversation engine ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum model round-trips per document.
    pub max_turns: u32,
    /// Corrective turns granted after the answer fails schema verification.
    pub max_corrections: u32,
    /// Extra tool-usage guidance appended to the system prompt.
    pub tool_prompt: Option<String>,
    /// Keep the full conversation transcript in the job report.
    pub keep_transcripts: bool,
}

impl EngineConfig {
    fn resolve(src: &Profiled<'_>) -> Self {
        Self {
            max_turns: src.parsed("MAX_TURNS", 12),
            max_corrections: src.parsed("MAX_CORRECTIONS", 1),
            tool_prompt: src.opt("TOOL_PROMPT"),
            keep_transcripts: src.or("KEEP_TRANSCRIPTS", "false") == "true",
        }
    }
}

// ── Batch scheduler ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub workers: usize,
    /// Re-enqueues allowed after a retryable failure.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl BatchConfig {
    fn resolve(src: &Profiled<'_>) -> Self {
        Self {
            workers: src.parsed("BATCH_WORKERS", 4),
            max_retries: src.parsed("MAX_RETRIES", 3),
            retry_base_delay_ms: src.parsed("RETRY_BASE_DELAY_MS", 500),
            retry_max_delay_ms: src.parsed("RETRY_MAX_DELAY_MS", 30_000),
        }
    }
}

// ── Tools ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub script_call_limit: u32,
    pub web_fetch_call_limit: u32,
    pub think_call_limit: u32,
    pub verify_call_limit: u32,
    pub script_timeout_ms: u64,
    pub script_max_output_bytes: usize,
    /// Address-space cap for the script child process.
    pub script_max_memory_mb: u64,
    /// Executable serving scripts; defaults to the running binary.
    pub script_sandbox_bin: Option<String>,
    pub fetch_timeout_secs: u64,
    pub fetch_max_bytes: usize,
}

impl ToolsConfig {
    fn resolve(src: &Profiled<'_>) -> Self {
        Self {
            script_call_limit: src.parsed("SCRIPT_CALL_LIMIT", 5),
            web_fetch_call_limit: src.parsed("WEB_FETCH_CALL_LIMIT", 5),
            think_call_limit: src.parsed("THINK_CALL_LIMIT", 5),
            verify_call_limit: src.parsed("VERIFY_CALL_LIMIT", 5),
            script_timeout_ms: src.parsed("SCRIPT_TIMEOUT_MS", 2_000),
            script_max_output_bytes: src.parsed("SCRIPT_MAX_OUTPUT_BYTES", 16 * 1024),
            script_max_memory_mb: src.parsed("SCRIPT_MAX_MEMORY_MB", 256),
            script_sandbox_bin: src.opt("SCRIPT_SANDBOX_BIN"),
            fetch_timeout_secs: src.parsed("FETCH_TIMEOUT_SECS", 10),
            fetch_max_bytes: src.parsed("FETCH_MAX_BYTES", 10 * 1024),
        }
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::from_lookup("", &|_| None)
    }
}
