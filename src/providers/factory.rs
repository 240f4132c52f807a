use super::anthropic::AnthropicAdapter;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiAdapter;
use super::traits::ProviderAdapter;
use crate::config::{CompletionConfig, ProvidersConfig};
use std::sync::Arc;

/// Model identifiers served per family. Routing is membership in these sets
/// — one function, no per-call-site sniffing.
pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o1",
    "o1-mini",
    "o3-mini",
    "o4-mini",
];

pub const GEMINI_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-pro",
    "gemini-2.5-pro",
];

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAi,
    Gemini,
    Anthropic,
}

/// The single routing decision: model identifier → owning family.
#[must_use]
pub fn family_for_model(model: &str) -> Option<ProviderFamily> {
    if OPENAI_MODELS.contains(&model) {
        Some(ProviderFamily::OpenAi)
    } else if GEMINI_MODELS.contains(&model) {
        Some(ProviderFamily::Gemini)
    } else if ANTHROPIC_MODELS.contains(&model) {
        Some(ProviderFamily::Anthropic)
    } else {
        None
    }
}

/// Every model the gateway can route, across all families.
pub fn routable_models() -> impl Iterator<Item = &'static str> {
    OPENAI_MODELS
        .iter()
        .chain(GEMINI_MODELS)
        .chain(ANTHROPIC_MODELS)
        .copied()
}

/// Holds one adapter per family, built once at startup from config.
pub struct AdapterRegistry {
    openai: Arc<OpenAiAdapter>,
    gemini: Arc<GeminiAdapter>,
    anthropic: Arc<AnthropicAdapter>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new(providers: &ProvidersConfig, completion: &CompletionConfig) -> Self {
        Self {
            openai: Arc::new(OpenAiAdapter::new(
                providers.openai.api_key.as_deref(),
                providers.openai.base_url.as_deref(),
                &completion.reasoning_effort,
                completion.max_tokens,
            )),
            gemini: Arc::new(GeminiAdapter::new(
                providers.gemini.api_key.as_deref(),
                providers.gemini.base_url.as_deref(),
                completion.max_tokens,
            )),
            anthropic: Arc::new(AnthropicAdapter::new(
                providers.anthropic.api_key.as_deref(),
                providers.anthropic.base_url.as_deref(),
                completion.max_tokens,
            )),
        }
    }

    #[must_use]
    pub fn adapter_for_model(&self, model: &str) -> Option<Arc<dyn ProviderAdapter>> {
        match family_for_model(model)? {
            ProviderFamily::OpenAi => Some(self.openai.clone()),
            ProviderFamily::Gemini => Some(self.gemini.clone()),
            ProviderFamily::Anthropic => Some(self.anthropic.clone()),
        }
    }
}
