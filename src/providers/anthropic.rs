use super::sse::{FrameBuffer, typed_payloads};
use super::traits::{ProviderAdapter, classify_transport_failure, classify_upstream_failure};
use super::types::{
    CanonicalRequest, ChatMessage, MessageRole, ProviderStream, StreamEvent, TokenUsage,
    usage_or_estimate,
};
use crate::error::ErrorKind;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "anthropic";
const FALLBACK_MODEL: &str = "claude-3-5-haiku-20241022";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages family. Diverges from the chat-completions shape on
/// both sides of the wire: a separate top-level `system` field, a mandatory
/// `max_tokens`, and `event:`/`data:` pair framing with usage split across
/// `message_start` (input) and `message_delta` (output).
pub struct AnthropicAdapter {
    api_key: Option<String>,
    messages_url: String,
    client: Client,
    default_max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    model: Option<String>,
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    usage: Option<OutputUsage>,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u64,
}

impl AnthropicAdapter {
    pub fn new(api_key: Option<&str>, base_url: Option<&str>, default_max_tokens: u32) -> Self {
        let base = base_url
            .map_or("https://api.anthropic.com", |url| url.trim_end_matches('/'))
            .to_string();
        Self {
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string),
            messages_url: format!("{base}/v1/messages"),
            client: super::http_client(),
            default_max_tokens,
        }
    }

    /// System messages move to the top-level `system` field; the rest keep
    /// their order with canonical roles mapped to the family's two roles.
    fn build_payload(&self, request: &CanonicalRequest) -> WireRequest {
        let system = request
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .map(|message| message.content.clone())
            .reduce(|acc, content| format!("{acc}\n{content}"));

        let messages = request
            .messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .map(|message| WireMessage {
                role: match message.role {
                    MessageRole::Assistant => "assistant",
                    MessageRole::User | MessageRole::System => "user",
                },
                content: message.content.clone(),
            })
            .collect();

        WireRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            system,
            messages,
            temperature: request.temperature,
            stream: true,
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn stream(&self, request: CanonicalRequest) -> ProviderStream {
        let payload = self.build_payload(&request);
        let client = self.client.clone();
        let url = self.messages_url.clone();
        let api_key = self.api_key.clone();
        let requested_model = request.model.clone();
        let messages: Vec<ChatMessage> = request.messages;

        Box::pin(async_stream::stream! {
            let Some(api_key) = api_key else {
                yield StreamEvent::Error {
                    kind: ErrorKind::AuthOrConfig,
                    message: "Anthropic API key is not configured on the gateway.".to_string(),
                };
                return;
            };

            let response = match client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", API_VERSION)
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
            let mut input_tokens: Option<u64> = None;
            let mut output_tokens: Option<u64> = None;
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
                    for (event, data) in typed_payloads(&frame) {
                        match event {
                            "message_start" => {
                                if let Ok(start) = serde_json::from_str::<MessageStart>(data) {
                                    served_model = start.message.model;
                                    input_tokens =
                                        start.message.usage.map(|usage| usage.input_tokens);
                                }
                            }
                            "content_block_delta" => {
                                if let Ok(block) = serde_json::from_str::<ContentBlockDelta>(data)
                                    && let BlockDelta::TextDelta { text } = block.delta
                                    && !text.is_empty()
                                {
                                    full_text.push_str(&text);
                                    yield StreamEvent::Content { text };
                                }
                            }
                            "message_delta" => {
                                if let Ok(delta) = serde_json::from_str::<MessageDelta>(data)
                                    && let Some(usage) = delta.usage
                                {
                                    output_tokens = Some(usage.output_tokens);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            let reported = match (input_tokens, output_tokens) {
                (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                }),
                _ => None,
            };
            let usage = usage_or_estimate(reported, &messages, &full_text);
            yield StreamEvent::Done {
                full_text,
                usage,
                model: served_model.unwrap_or(requested_model),
            };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(Some("test-key"), None, 1024)
    }

    #[test]
    fn system_messages_lift_to_top_level_field() {
        let request = CanonicalRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![
                ChatMessage::system("Be terse."),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("continue"),
            ],
            max_tokens: None,
            temperature: Some(0.2),
        };

        let json = serde_json::to_value(adapter().build_payload(&request)).unwrap();
        assert_eq!(json["system"], "Be terse.");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["messages"].as_array().unwrap().len(), 3);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn payload_without_system_omits_field() {
        let request = CanonicalRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: Some(64),
            temperature: None,
        };

        let json = serde_json::to_string(&adapter().build_payload(&request)).unwrap();
        assert!(!json.contains("\"system\""));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn message_start_carries_model_and_input_usage() {
        let start: MessageStart = serde_json::from_str(
            r#"{"type":"message_start",
                "message":{"model":"claude-3-5-haiku-20241022",
                           "usage":{"input_tokens":17}}}"#,
        )
        .unwrap();
        assert_eq!(start.message.usage.unwrap().input_tokens, 17);
    }

    #[test]
    fn text_delta_parses_and_other_deltas_ignore() {
        let block: ContentBlockDelta = serde_json::from_str(
            r#"{"index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        )
        .unwrap();
        assert!(matches!(block.delta, BlockDelta::TextDelta { ref text } if text == "Hel"));

        let other: ContentBlockDelta = serde_json::from_str(
            r#"{"index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#,
        )
        .unwrap();
        assert!(matches!(other.delta, BlockDelta::Unknown));
    }

    #[test]
    fn message_delta_carries_output_usage() {
        let delta: MessageDelta = serde_json::from_str(
            r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#,
        )
        .unwrap();
        assert_eq!(delta.usage.unwrap().output_tokens, 42);
    }

    #[tokio::test]
    async fn missing_key_yields_config_error() {
        let adapter = AnthropicAdapter::new(None, None, 1024);
        let request = CanonicalRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: None,
            temperature: None,
        };

        let mut stream = adapter.stream(request);
        match stream.next().await {
            Some(StreamEvent::Error { kind, .. }) => assert_eq!(kind, ErrorKind::AuthOrConfig),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
