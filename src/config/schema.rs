use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ─── Top-level config ──────────────────────────────────────────────────────

/// Process configuration. Loaded once at startup — request handling never
/// re-reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            gateway: GatewayConfig::default(),
            providers: ProvidersConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tollgate.db")
}

// ─── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Bind port (default: 8080)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8080
}

// ─── Upstream providers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEndpoint,
    #[serde(default)]
    pub gemini: ProviderEndpoint,
    #[serde(default)]
    pub anthropic: ProviderEndpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override for tests and self-hosted proxies.
    #[serde(default)]
    pub base_url: Option<String>,
}

// ─── Completion defaults ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Applied when a request carries no max_tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Effort control for the reasoning model sub-family.
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    /// Upper bound on the wait for the next upstream chunk.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reasoning_effort: default_reasoning_effort(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_reasoning_effort() -> String {
    "medium".into()
}

fn default_stall_timeout_secs() -> u64 {
    60
}
