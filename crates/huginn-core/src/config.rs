use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment variable prefix; sections are separated by `__`
/// (e.g. `HUGINN_AGENT__MODEL` → `agent.model`).
pub const ENV_PREFIX: &str = "HUGINN_";

/// Default heartbeat cadence in minutes.
pub const DEFAULT_HEARTBEAT_MINUTES: u64 = 30;

/// Session key reserved for the heartbeat ticker.
pub const HEARTBEAT_SESSION_KEY: &str = "heartbeat:internal";

/// Top-level config (huginn.toml + HUGINN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuginnConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Per-channel transport settings, keyed by channel name.
    #[serde(default)]
    pub transports: HashMap<String, TransportConfig>,
}

impl Default for HuginnConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            media: MediaConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            provider: ProviderConfig::default(),
            transports: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(default = "default_max_session_messages")]
    pub max_session_messages: usize,
    /// Hard context-window override; when unset the limit is detected from
    /// the model name.
    pub max_context_tokens: Option<u32>,
    /// Per-model context-window overrides, keyed by model-name prefix.
    #[serde(default)]
    pub model_overrides: HashMap<String, u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_iterations: default_max_tool_iterations(),
            max_session_messages: default_max_session_messages(),
            max_context_tokens: None,
            model_overrides: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Resolve the context-window size in tokens for the configured model.
    ///
    /// Precedence: `max_context_tokens` > `model_overrides` prefix match >
    /// built-in table > 128k fallback.
    pub fn context_limit(&self) -> u32 {
        if let Some(limit) = self.max_context_tokens {
            return limit;
        }
        for (prefix, limit) in &self.model_overrides {
            if self.model.starts_with(prefix.as_str()) {
                return *limit;
            }
        }
        builtin_context_limit(&self.model)
    }
}

/// Known context-window sizes by model-name prefix.
fn builtin_context_limit(model: &str) -> u32 {
    const TABLE: &[(&str, u32)] = &[
        ("gpt-4.1", 1_047_576),
        ("gpt-4o", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-3.5", 16_385),
        ("o3", 200_000),
        ("o4", 200_000),
        ("claude", 200_000),
    ];
    for (prefix, limit) in TABLE {
        if model.starts_with(prefix) {
            return *limit;
        }
    }
    128_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Hard boundary for file/shell tools: paths outside the workspace are
    /// rejected.
    #[serde(default = "bool_true")]
    pub restrict_to_workspace: bool,
    /// Workspace root for the boundary check. Defaults to the process CWD.
    pub workspace_dir: Option<String>,
    /// Deadline for the shell tool, seconds.
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            restrict_to_workspace: true,
            workspace_dir: None,
            exec_timeout_secs: default_exec_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Allowed MIME types. Entries ending in `/` are prefix matches
    /// (e.g. `image/`), everything else is exact.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_max_bytes_per_item")]
    pub max_bytes_per_item: u64,
    #[serde(default = "default_max_items_per_message")]
    pub max_items_per_message: usize,
    #[serde(default = "default_temp_ttl_minutes")]
    pub temp_ttl_minutes: i64,
    /// Unknown MIME types are quarantined instead of allowed.
    #[serde(default = "bool_true")]
    pub quarantine_unknown_mime: bool,
    /// Oversized items are rejected outright instead of quarantined.
    #[serde(default)]
    pub reject_over_limit: bool,
    #[serde(default)]
    pub ocr_enabled: bool,
    #[serde(default)]
    pub transcription_enabled: bool,
    #[serde(default = "bool_true")]
    pub audit_events: bool,
    /// Deadline per processing stage, seconds.
    #[serde(default = "default_processor_timeout_secs")]
    pub processor_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_mime_types: default_allowed_mime_types(),
            max_bytes_per_item: default_max_bytes_per_item(),
            max_items_per_message: default_max_items_per_message(),
            temp_ttl_minutes: default_temp_ttl_minutes(),
            quarantine_unknown_mime: true,
            reject_over_limit: false,
            ocr_enabled: false,
            transcription_enabled: false,
            audit_events: true,
            processor_timeout_secs: default_processor_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_heartbeat_minutes")]
    pub heartbeat_minutes: u64,
    /// Grace period for in-flight turns during shutdown, seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_minutes: default_heartbeat_minutes(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// OpenAI-wire-compatible LLM endpoint settings.
///
/// `api_key` is a secret: it is only ever read from the environment
/// (`HUGINN_PROVIDER__API_KEY`); file values are discarded at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// Deadline per LLM call, seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_base_url(),
            chat_path: default_chat_path(),
            request_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    /// Sender allowlist for this channel. Empty means deny everyone.
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Credential for the transport. Secret: env-only
    /// (`HUGINN_TRANSPORTS__<NAME>__TOKEN`); file values are discarded.
    pub token: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tool_iterations() -> u32 {
    10
}
fn default_max_session_messages() -> usize {
    100
}
fn default_exec_timeout_secs() -> u64 {
    60
}
fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "image/".to_string(),
        "audio/".to_string(),
        "application/pdf".to_string(),
    ]
}
fn default_max_bytes_per_item() -> u64 {
    20 * 1024 * 1024
}
fn default_max_items_per_message() -> usize {
    8
}
fn default_temp_ttl_minutes() -> i64 {
    120
}
fn default_processor_timeout_secs() -> u64 {
    30
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.huginn/huginn.db", home)
}
fn default_heartbeat_minutes() -> u64 {
    DEFAULT_HEARTBEAT_MINUTES
}
fn default_shutdown_grace_secs() -> u64 {
    20
}
fn default_provider_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

impl HuginnConfig {
    /// Load config with layered sources, later overriding earlier:
    /// packaged defaults → TOML file → `HUGINN_*` env vars.
    ///
    /// File lookup order: explicit path argument, then `HUGINN_CONFIG`,
    /// then `~/.huginn/huginn.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("HUGINN_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let mut config: HuginnConfig = Figment::new()
            .merge(Serialized::defaults(HuginnConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.scrub_secrets();
        Ok(config)
    }

    /// Force secret-valued keys to come from the environment only.
    ///
    /// Whatever the file (or the figment merge) produced for these keys is
    /// replaced with the environment value, or cleared when the variable is
    /// unset.
    pub fn scrub_secrets(&mut self) {
        self.provider.api_key = std::env::var("HUGINN_PROVIDER__API_KEY").ok();

        for (name, transport) in self.transports.iter_mut() {
            let var = format!(
                "HUGINN_TRANSPORTS__{}__TOKEN",
                name.to_ascii_uppercase()
            );
            transport.token = std::env::var(&var).ok();
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.huginn/huginn.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = HuginnConfig::default();
        assert_eq!(cfg.agent.max_tool_iterations, 10);
        assert_eq!(cfg.agent.max_session_messages, 100);
        assert!(cfg.media.enabled);
        assert!(cfg.tools.restrict_to_workspace);
        assert_eq!(cfg.gateway.heartbeat_minutes, 30);
    }

    #[test]
    fn context_limit_prefers_explicit_override() {
        let mut cfg = AgentConfig::default();
        cfg.max_context_tokens = Some(9000);
        assert_eq!(cfg.context_limit(), 9000);
    }

    #[test]
    fn context_limit_uses_model_override_prefix() {
        let mut cfg = AgentConfig::default();
        cfg.model = "mistral-large".to_string();
        cfg.model_overrides.insert("mistral".to_string(), 32_000);
        assert_eq!(cfg.context_limit(), 32_000);
    }

    #[test]
    fn context_limit_detects_known_models() {
        let mut cfg = AgentConfig::default();
        cfg.model = "gpt-4o-mini".to_string();
        assert_eq!(cfg.context_limit(), 128_000);
        cfg.model = "gpt-3.5-turbo".to_string();
        assert_eq!(cfg.context_limit(), 16_385);
    }

    #[test]
    fn context_limit_falls_back_for_unknown_models() {
        let mut cfg = AgentConfig::default();
        cfg.model = "some-local-model".to_string();
        assert_eq!(cfg.context_limit(), 128_000);
    }

    #[test]
    fn scrub_clears_file_provided_secret() {
        // No HUGINN_PROVIDER__API_KEY in the test environment.
        std::env::remove_var("HUGINN_PROVIDER__API_KEY");
        let mut cfg = HuginnConfig::default();
        cfg.provider.api_key = Some("from-file".to_string());
        cfg.scrub_secrets();
        assert_eq!(cfg.provider.api_key, None);
    }
}
