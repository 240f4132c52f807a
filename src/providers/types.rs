use crate::error::ErrorKind;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Canonical completion request: the one shape every adapter translates from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Prompt/completion token tally for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The normalized contract every adapter produces and the only shape the
/// orchestrator understands. `Error` terminates the sequence; no `Done`
/// follows it.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Content {
        text: String,
    },
    Done {
        full_text: String,
        usage: TokenUsage,
        model: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// Fixed character-to-token ratio (4 chars ≈ 1 token), rounded up. Used when
/// a provider family never reports usage.
#[must_use]
pub fn estimate_tokens(char_count: usize) -> u64 {
    (char_count as u64).div_ceil(4)
}

/// Prompt-side estimation input: the serialized canonical message list.
#[must_use]
pub fn serialized_prompt_len(messages: &[ChatMessage]) -> usize {
    serde_json::to_string(messages).map_or(0, |serialized| serialized.len())
}

/// Fill in missing usage halves from character counts.
#[must_use]
pub fn usage_or_estimate(
    reported: Option<TokenUsage>,
    messages: &[ChatMessage],
    output_text: &str,
) -> TokenUsage {
    reported.unwrap_or_else(|| TokenUsage {
        prompt_tokens: estimate_tokens(serialized_prompt_len(messages)),
        completion_tokens: estimate_tokens(output_text.len()),
    })
}
