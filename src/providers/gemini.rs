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

const PROVIDER: &str = "gemini";
const FALLBACK_MODEL: &str = "gemini-2.0-flash-lite";

/// Google Gemini family. Chat-style but with its own field layout:
/// `contents[].parts[].text` with a `user`/`model` role pair, a separate
/// `systemInstruction`, camelCase generation config, and block-based SSE
/// frames (`candidates[].content.parts[].text`). `usageMetadata` is not
/// guaranteed on every stream — absent usage falls back to the
/// character-ratio estimate.
pub struct GeminiAdapter {
    api_key: Option<String>,
    base_url: String,
    client: Client,
    default_max_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireParts>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WireParts {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WirePart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

impl GeminiAdapter {
    pub fn new(api_key: Option<&str>, base_url: Option<&str>, default_max_tokens: u32) -> Self {
        Self {
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string),
            base_url: base_url
                .map_or("https://generativelanguage.googleapis.com", |url| {
                    url.trim_end_matches('/')
                })
                .to_string(),
            client: super::http_client(),
            default_max_tokens,
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }

    fn build_payload(&self, request: &CanonicalRequest) -> WireRequest {
        let system_parts: Vec<WirePart> = request
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .map(|message| WirePart {
                text: message.content.clone(),
            })
            .collect();

        let contents = request
            .messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .map(|message| WireContent {
                role: match message.role {
                    MessageRole::Assistant => "model",
                    MessageRole::User | MessageRole::System => "user",
                },
                parts: vec![WirePart {
                    text: message.content.clone(),
                }],
            })
            .collect();

        WireRequest {
            contents,
            system_instruction: (!system_parts.is_empty())
                .then_some(WireParts { parts: system_parts }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            },
        }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn stream(&self, request: CanonicalRequest) -> ProviderStream {
        let payload = self.build_payload(&request);
        let client = self.client.clone();
        let url = self.stream_url(&request.model);
        let api_key = self.api_key.clone();
        let requested_model = request.model.clone();
        let messages: Vec<ChatMessage> = request.messages;

        Box::pin(async_stream::stream! {
            let Some(api_key) = api_key else {
                yield StreamEvent::Error {
                    kind: ErrorKind::AuthOrConfig,
                    message: "Gemini API key is not configured on the gateway.".to_string(),
                };
                return;
            };

            let response = match client
                .post(&url)
                .header("x-goog-api-key", &api_key)
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
                            served_model = parsed.model_version;
                        }
                        if let Some(metadata) = parsed.usage_metadata
                            && let (Some(prompt), Some(completion)) =
                                (metadata.prompt_token_count, metadata.candidates_token_count)
                        {
                            reported = Some(TokenUsage {
                                prompt_tokens: prompt,
                                completion_tokens: completion,
                            });
                        }
                        for candidate in parsed.candidates {
                            let Some(content) = candidate.content else {
                                continue;
                            };
                            for part in content.parts {
                                if let Some(text) = part.text
                                    && !text.is_empty()
                                {
                                    full_text.push_str(&text);
                                    yield StreamEvent::Content { text };
                                }
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
