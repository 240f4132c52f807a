pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod scrub;
pub mod sse;
pub mod traits;
pub mod types;

pub use factory::{AdapterRegistry, family_for_model, routable_models};
pub use traits::ProviderAdapter;
pub use types::{
    CanonicalRequest, ChatMessage, MessageRole, ProviderStream, StreamEvent, TokenUsage,
};

use std::time::Duration;

/// Shared HTTP client shape for all upstream families: bounded total request
/// duration, fast connect failure, pooled keep-alive connections.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
