use super::sse::{FrameBuffer, data_payloads};
use super::traits::{ProviderAdapter, classify_transport_failure, classify_upstream_failure};
use super::types::{
    CanonicalRequest, ChatMessage, MessageRole, ProviderStream, StreamEvent, TokenUsage,
    usage_or_estimate,
};
use crate::error::ErrorKind;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai";
const FALLBACK_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat-completions family. Delta-framed SSE: `data:` lines carrying
/// `choices[].delta.content`, a `[DONE]` sentinel, usage in a trailing chunk
/// when `stream_options.include_usage` is set.
///
/// Hosts the reasoning sub-family (`o1*`/`o3*`/`o4*` model ids), which takes
/// a bounded completion-length control plus a qualitative effort control and
/// rejects temperature-style sampling parameters outright.
pub struct OpenAiAdapter {
    /// Pre-computed `"Bearer <key>"` header value.
    auth_header: Option<String>,
    chat_url: String,
    client: Client,
    reasoning_effort: String,
    default_max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Reasoning variants are detected by model-identifier pattern.
#[must_use]
pub fn is_reasoning_model(model: &str) -> bool {
    ["o1", "o3", "o4"]
        .iter()
        .any(|prefix| model == *prefix || model.starts_with(&format!("{prefix}-")))
}

impl OpenAiAdapter {
    pub fn new(
        api_key: Option<&str>,
        base_url: Option<&str>,
        reasoning_effort: &str,
        default_max_tokens: u32,
    ) -> Self {
        let base = base_url
            .map_or("https://api.openai.com", |url| url.trim_end_matches('/'))
            .to_string();
        Self {
            auth_header: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(|key| format!("Bearer {key}")),
            chat_url: format!("{base}/v1/chat/completions"),
            client: super::http_client(),
            reasoning_effort: reasoning_effort.to_string(),
            default_max_tokens,
        }
    }

    fn wire_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn build_payload(&self, request: &CanonicalRequest) -> WireRequest {
        let messages = request
            .messages
            .iter()
            .map(|message| WireMessage {
                role: Self::wire_role(message.role),
                content: message.content.clone(),
            })
            .collect();

        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);

        if is_reasoning_model(&request.model) {
            // Sampling controls are a request-level error for this
            // sub-family; only the bounded-length and effort controls go out.
            WireRequest {
                model: request.model.clone(),
                messages,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
                temperature: None,
                max_tokens: None,
                max_completion_tokens: Some(max_tokens),
                reasoning_effort: Some(self.reasoning_effort.clone()),
            }
        } else {
            WireRequest {
                model: request.model.clone(),
                messages,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
                temperature: request.temperature,
                max_tokens: Some(max_tokens),
                max_completion_tokens: None,
                reasoning_effort: None,
            }
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn stream(&self, request: CanonicalRequest) -> ProviderStream {
        let payload = self.build_payload(&request);
        let client = self.client.clone();
        let url = self.chat_url.clone();
        let auth_header = self.auth_header.clone();
        let requested_model = request.model.clone();
        let messages: Vec<ChatMessage> = request.messages;

        Box::pin(async_stream::stream! {
            let Some(auth_header) = auth_header else {
                yield StreamEvent::Error {
                    kind: ErrorKind::AuthOrConfig,
                    message: "OpenAI API key is not configured on the gateway.".to_string(),
                };
                return;
            };

            let response = match client
                .post(&url)
                .header("Authorization", &auth_header)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    let (kind, message) = classify_transport_failure(PROVIDER, &error);
                    yield StreamEvent::Error { kind, message };
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let (kind, message) =
                    classify_upstream_failure(PROVIDER, status.as_u16(), &body, FALLBACK_MODEL);
                yield StreamEvent::Error { kind, message };
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut frames = FrameBuffer::new();
            let mut full_text = String::new();
            let mut reported: Option<TokenUsage> = None;
            let mut served_model: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        let (kind, message) = classify_transport_failure(PROVIDER, &error);
                        yield StreamEvent::Error { kind, message };
                        return;
                    }
                };
                frames.extend(&chunk);

                while let Some(frame) = frames.next_frame() {
                    for payload in data_payloads(&frame) {
                        let Ok(parsed) = serde_json::from_str::<StreamChunk>(payload) else {
                            continue;
                        };
                        if served_model.is_none() {
                            served_model = parsed.model;
                        }
                        if let Some(usage) = parsed.usage {
                            reported = Some(TokenUsage {
                                prompt_tokens: usage.prompt_tokens,
                                completion_tokens: usage.completion_tokens,
                            });
                        }
                        for choice in parsed.choices {
                            if let Some(text) = choice.delta.content
                                && !text.is_empty()
                            {
                                full_text.push_str(&text);
                                yield StreamEvent::Content { text };
                            }
                        }
                    }
                }
            }

            let usage = usage_or_estimate(reported, &messages, &full_text);
            yield StreamEvent::Done {
                full_text,
                usage,
                model: served_model.unwrap_or(requested_model),
            };
        })
    }
}
