use crate::config::CompletionConfig;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::pricing::{ModelPricing, default_pricing};
use crate::providers::{
    AdapterRegistry, CanonicalRequest, ChatMessage, MessageRole, StreamEvent, TokenUsage,
    family_for_model,
};
use crate::quota::QuotaLedger;
use crate::store::conversations::{self, NewMessage, StoredRole};
use crate::store::usage;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

// ─── External request / frame shapes ─────────────────────────────────────────

/// Inbound body for the streaming chat endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub conversation_id: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// JSON frames written into the caller's SSE stream. Exactly one terminal
/// frame (`done` or `error`) ends every stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        content: String,
        usage: UsageFrame,
        model: String,
        message_ids: MessageIds,
    },
    Error {
        error: ErrorKind,
        message: String,
    },
}

impl StreamFrame {
    #[must_use]
    pub fn from_error(error: &GatewayError) -> Self {
        Self::Error {
            error: error.kind,
            message: error.message.clone(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Content { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageFrame {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<TokenUsage> for UsageFrame {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIds {
    pub user_message: String,
    pub ai_message: String,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send + 'static>>;

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// An exchange that has passed every pre-flight stage: quota checked,
/// conversation ensured, user message durably stored, both sequence numbers
/// allocated. Everything after this point happens inside the open stream.
#[derive(Debug, Clone)]
pub struct PreparedExchange {
    pub account_id: String,
    pub conversation_id: String,
    pub request: CanonicalRequest,
    pub user_message_id: String,
    pub user_text: String,
    assistant_sequence: u64,
}

/// Non-streaming completion produced by the helper primitive.
#[derive(Debug, Clone, Serialize)]
pub struct OneshotCompletion {
    pub text: String,
    pub usage: UsageFrame,
    pub model: String,
}

/// Drives one exchange through
/// `Validated → QuotaChecked → ConversationEnsured → UserMessagePersisted →
/// Streaming → {Completed | Failed}`.
pub struct Orchestrator {
    pool: SqlitePool,
    registry: AdapterRegistry,
    ledger: QuotaLedger,
    pricing: Vec<ModelPricing>,
    stall_timeout: Duration,
}

impl Orchestrator {
    #[must_use]
    pub fn new(pool: SqlitePool, registry: AdapterRegistry, completion: &CompletionConfig) -> Self {
        Self {
            ledger: QuotaLedger::new(pool.clone()),
            pool,
            registry,
            pricing: default_pricing(),
            stall_timeout: Duration::from_secs(completion.stall_timeout_secs.max(1)),
        }
    }

    /// `Validated`: checked before any side effect occurs.
    fn validate(request: &ChatStreamRequest) -> Result<()> {
        if request.stream != Some(true) {
            return Err(GatewayError::new(
                ErrorKind::StreamingOnly,
                "this endpoint only serves streaming requests; set \"stream\": true",
            ));
        }
        if request.model.is_empty() || family_for_model(&request.model).is_none() {
            return Err(GatewayError::invalid_request(format!(
                "unknown model {:?}; no adapter serves it",
                request.model
            )));
        }
        if request.conversation_id.is_empty() {
            return Err(GatewayError::invalid_request("conversation_id is required"));
        }
        match request.messages.last() {
            None => {
                return Err(GatewayError::invalid_request("messages must not be empty"));
            }
            Some(last) if last.role != MessageRole::User => {
                return Err(GatewayError::invalid_request(
                    "the last message of an exchange must have role \"user\"",
                ));
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Run every pre-flight stage. Failures here carry no stream: the
    /// handler maps them to a plain HTTP error response.
    pub async fn prepare(
        &self,
        account_id: &str,
        request: ChatStreamRequest,
    ) -> Result<PreparedExchange> {
        Self::validate(&request)?;

        self.ledger
            .check_and_reserve(account_id, &request.model)
            .await?;

        conversations::ensure(&self.pool, &request.conversation_id, account_id).await?;

        // Both sequence numbers are allocated up front, user first, so the
        // pair stays ordered even against concurrent exchanges interleaving
        // their own allocations.
        let user_sequence = conversations::next_sequence(&self.pool, &request.conversation_id).await?;
        let assistant_sequence =
            conversations::next_sequence(&self.pool, &request.conversation_id).await?;

        let user_text = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();

        let user_message_id = conversations::persist_message(
            &self.pool,
            NewMessage {
                conversation_id: &request.conversation_id,
                role: StoredRole::User,
                content: &user_text,
                model_used: None,
                input_tokens: 0,
                output_tokens: 0,
                sequence_number: user_sequence,
            },
        )
        .await?;

        Ok(PreparedExchange {
            account_id: account_id.to_string(),
            conversation_id: request.conversation_id,
            request: CanonicalRequest {
                model: request.model,
                messages: request.messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            },
            user_message_id,
            user_text,
            assistant_sequence,
        })
    }

    /// `Streaming`: forward upstream content immediately, then persist and
    /// account on completion. Dropping the returned stream (caller
    /// disconnect) drops the upstream call with it — a disconnected exchange
    /// records nothing.
    pub fn stream_exchange(self: Arc<Self>, prepared: PreparedExchange) -> FrameStream {
        Box::pin(async_stream::stream! {
            let Some(adapter) = self.registry.adapter_for_model(&prepared.request.model) else {
                // validate() already guaranteed a route; keep the invariant
                // visible rather than panicking inside an open stream.
                yield StreamFrame::Error {
                    error: ErrorKind::InternalError,
                    message: "no adapter for validated model".to_string(),
                };
                return;
            };

            let mut upstream = adapter.stream(prepared.request.clone());

            loop {
                let event = match tokio::time::timeout(self.stall_timeout, upstream.next()).await {
                    Err(_) => {
                        yield StreamFrame::Error {
                            error: ErrorKind::ProviderError,
                            message: format!(
                                "{} stalled mid-stream; the request was aborted. Retry shortly.",
                                adapter.name()
                            ),
                        };
                        return;
                    }
                    Ok(None) => {
                        yield StreamFrame::Error {
                            error: ErrorKind::ProviderError,
                            message: format!(
                                "{} ended the stream without completing the response",
                                adapter.name()
                            ),
                        };
                        return;
                    }
                    Ok(Some(event)) => event,
                };

                match event {
                    StreamEvent::Content { text } => {
                        yield StreamFrame::Content { content: text };
                    }
                    StreamEvent::Error { kind, message } => {
                        // The user message persisted in prepare() stays; no
                        // assistant message, no usage increment.
                        yield StreamFrame::Error { error: kind, message };
                        return;
                    }
                    StreamEvent::Done { full_text, usage, model } => {
                        match self.finalize(&prepared, &full_text, usage).await {
                            Ok(message_ids) => {
                                yield StreamFrame::Done {
                                    content: full_text,
                                    usage: usage.into(),
                                    model,
                                    message_ids,
                                };
                            }
                            Err(error) => {
                                yield StreamFrame::from_error(&error);
                            }
                        }
                        return;
                    }
                }
            }
        })
    }

    /// Post-`Done` persistence. The assistant message is load-bearing; the
    /// accounting and conversation metadata are best-effort once the caller
    /// already holds the full response.
    async fn finalize(
        &self,
        prepared: &PreparedExchange,
        full_text: &str,
        usage: TokenUsage,
    ) -> Result<MessageIds> {
        let ai_message_id = conversations::persist_message(
            &self.pool,
            NewMessage {
                conversation_id: &prepared.conversation_id,
                role: StoredRole::Assistant,
                content: full_text,
                model_used: Some(&prepared.request.model),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                sequence_number: prepared.assistant_sequence,
            },
        )
        .await
        .map_err(|error| {
            GatewayError::new(
                ErrorKind::DatabaseOperationFailed,
                format!("failed to persist assistant message: {}", error.message),
            )
        })?;

        self.record_usage(&prepared.account_id, &prepared.request.model, usage)
            .await;

        if let Err(error) = conversations::update_title_if_default(
            &self.pool,
            &prepared.conversation_id,
            &prepared.user_text,
        )
        .await
        {
            tracing::warn!(
                conversation_id = prepared.conversation_id,
                "title update failed: {error}"
            );
        }
        if let Err(error) = conversations::append_model_history(
            &self.pool,
            &prepared.conversation_id,
            &prepared.request.model,
        )
        .await
        {
            tracing::warn!(
                conversation_id = prepared.conversation_id,
                "model history update failed: {error}"
            );
        }

        Ok(MessageIds {
            user_message: prepared.user_message_id.clone(),
            ai_message: ai_message_id,
        })
    }

    async fn record_usage(&self, account_id: &str, model: &str, usage: TokenUsage) {
        if let Err(error) = usage::record(
            &self.pool,
            account_id,
            model,
            usage,
            1,
            &self.pricing,
            Utc::now().date_naive(),
        )
        .await
        {
            tracing::warn!(account_id, model, "usage accounting failed: {error}");
        }
    }

    /// The non-streaming helper primitive ("enhance prompt", "generate
    /// example"): same quota pre-flight, same adapter call, same usage
    /// accounting — driven to completion internally instead of forwarded.
    pub async fn run_oneshot(
        &self,
        account_id: &str,
        model: &str,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
    ) -> Result<OneshotCompletion> {
        if model.is_empty() || family_for_model(model).is_none() {
            return Err(GatewayError::invalid_request(format!(
                "unknown model {model:?}; no adapter serves it"
            )));
        }
        if messages.is_empty() {
            return Err(GatewayError::invalid_request("messages must not be empty"));
        }

        self.ledger.check_and_reserve(account_id, model).await?;

        let adapter = self.registry.adapter_for_model(model).ok_or_else(|| {
            GatewayError::new(ErrorKind::InternalError, "no adapter for validated model")
        })?;

        let mut upstream = adapter.stream(CanonicalRequest {
            model: model.to_string(),
            messages,
            max_tokens,
            temperature: None,
        });

        loop {
            let event = match tokio::time::timeout(self.stall_timeout, upstream.next()).await {
                Err(_) => {
                    return Err(GatewayError::new(
                        ErrorKind::ProviderError,
                        format!("{} stalled; the request was aborted", adapter.name()),
                    ));
                }
                Ok(None) => {
                    return Err(GatewayError::new(
                        ErrorKind::ProviderError,
                        format!("{} ended without completing the response", adapter.name()),
                    ));
                }
                Ok(Some(event)) => event,
            };

            match event {
                StreamEvent::Content { .. } => {}
                StreamEvent::Error { kind, message } => {
                    return Err(GatewayError::new(kind, message));
                }
                StreamEvent::Done { full_text, usage, model: served } => {
                    self.record_usage(account_id, model, usage).await;
                    return Ok(OneshotCompletion {
                        text: full_text,
                        usage: usage.into(),
                        model: served,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> ChatStreamRequest {
        ChatStreamRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hello")],
            conversation_id: "conv-1".to_string(),
            max_tokens: None,
            temperature: None,
            stream: Some(true),
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        assert!(Orchestrator::validate(&valid_request()).is_ok());
    }

    #[test]
    fn non_streaming_request_is_rejected() {
        for stream in [None, Some(false)] {
            let request = ChatStreamRequest {
                stream,
                ..valid_request()
            };
            let err = Orchestrator::validate(&request).unwrap_err();
            assert_eq!(err.kind, ErrorKind::StreamingOnly);
        }
    }

    #[test]
    fn unknown_model_is_invalid_before_any_side_effect() {
        let request = ChatStreamRequest {
            model: "llama-70b".to_string(),
            ..valid_request()
        };
        let err = Orchestrator::validate(&request).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn empty_messages_are_invalid() {
        let request = ChatStreamRequest {
            messages: vec![],
            ..valid_request()
        };
        assert_eq!(
            Orchestrator::validate(&request).unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn last_message_must_be_user() {
        let request = ChatStreamRequest {
            messages: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            ..valid_request()
        };
        assert_eq!(
            Orchestrator::validate(&request).unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn missing_conversation_id_is_invalid() {
        let request = ChatStreamRequest {
            conversation_id: String::new(),
            ..valid_request()
        };
        assert_eq!(
            Orchestrator::validate(&request).unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn frames_tag_and_case_match_the_wire_contract() {
        let frame = StreamFrame::Content {
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hi");

        let frame = StreamFrame::Error {
            error: ErrorKind::RateLimited,
            message: "slow down".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "RATE_LIMITED");
        assert!(frame.is_terminal());
    }

    #[test]
    fn done_frame_serializes_camel_case() {
        let frame = StreamFrame::Done {
            content: "hi".to_string(),
            usage: TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
            }
            .into(),
            model: "gpt-4o-mini".to_string(),
            message_ids: MessageIds {
                user_message: "u1".to_string(),
                ai_message: "a1".to_string(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["usage"]["promptTokens"], 1);
        assert_eq!(json["usage"]["totalTokens"], 3);
        assert_eq!(json["messageIds"]["userMessage"], "u1");
        assert_eq!(json["messageIds"]["aiMessage"], "a1");
    }

    #[test]
    fn request_body_accepts_camel_case_fields() {
        let request: ChatStreamRequest = serde_json::from_str(
            r#"{"model":"gpt-4o-mini",
                "messages":[{"role":"user","content":"hi"}],
                "conversationId":"conv-1",
                "maxTokens":64,
                "stream":true}"#,
        )
        .unwrap();
        assert_eq!(request.conversation_id, "conv-1");
        assert_eq!(request.max_tokens, Some(64));
        assert!(Orchestrator::validate(&request).is_ok());
    }

    #[test]
    fn usage_frame_totals() {
        let frame: UsageFrame = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 32,
        }
        .into();
        assert_eq!(frame.total_tokens, 42);
    }
}
