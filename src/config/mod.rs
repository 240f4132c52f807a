pub mod schema;

pub use schema::{
    CompletionConfig, Config, GatewayConfig, ProviderEndpoint, ProvidersConfig,
};

use anyhow::Context;
use std::path::Path;

impl Config {
    /// Load from an optional TOML file, then let the environment override
    /// provider credentials and the database path. Called exactly once at
    /// startup.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut Option<String>); 3] = [
            ("OPENAI_API_KEY", &mut self.providers.openai.api_key),
            ("GEMINI_API_KEY", &mut self.providers.gemini.api_key),
            ("ANTHROPIC_API_KEY", &mut self.providers.anthropic.api_key),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                let value = value.trim().to_string();
                if !value.is_empty() {
                    *slot = Some(value);
                }
            }
        }

        if let Ok(path) = std::env::var("TOLLGATE_DATABASE") {
            let path = path.trim();
            if !path.is_empty() {
                self.database_path = path.into();
            }
        }
    }
}
