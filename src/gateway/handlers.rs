use super::{AppState, auth};
use crate::error::GatewayError;
use crate::orchestrator::ChatStreamRequest;
use crate::providers::ChatMessage;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use serde::Deserialize;

const ENHANCE_INSTRUCTION: &str = "Rewrite the user's prompt to be clearer and more specific \
     while preserving its intent. Reply with the improved prompt only.";
const EXAMPLE_INSTRUCTION: &str = "Produce one concise, concrete example answering the user's \
     request. Reply with the example only.";

fn error_response(error: &GatewayError) -> Response {
    let status = StatusCode::from_u16(error.kind.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = serde_json::json!({
        "error": error.kind,
        "message": error.message,
    });
    if let Some(details) = &error.details {
        body["details"] = details.clone();
    }
    (status, Json(body)).into_response()
}

/// POST /v1/chat/stream — the core exchange endpoint.
///
/// Pre-flight failures return a plain HTTP error; once the SSE stream opens,
/// failures become the terminal `error` frame (the status line is already
/// gone by then).
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    let account_id = match auth::authenticate(&state.pool, &headers).await {
        Ok(account_id) => account_id,
        Err(error) => return error_response(&error),
    };

    let prepared = match state.orchestrator.prepare(&account_id, request).await {
        Ok(prepared) => prepared,
        Err(error) => return error_response(&error),
    };

    let frames = state.orchestrator.clone().stream_exchange(prepared);
    let body_stream = frames.map(|frame| {
        let json = serde_json::to_string(&frame).unwrap_or_else(|_| {
            r#"{"type":"error","error":"INTERNAL_ERROR","message":"frame serialization failed"}"#
                .to_string()
        });
        Ok::<_, std::convert::Infallible>(format!("data: {json}\n\n"))
    });

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Body shared by the non-streaming helper endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

async fn run_helper(
    state: &AppState,
    headers: &HeaderMap,
    request: HelperRequest,
    instruction: &str,
) -> Response {
    let account_id = match auth::authenticate(&state.pool, headers).await {
        Ok(account_id) => account_id,
        Err(error) => return error_response(&error),
    };

    let messages = vec![
        ChatMessage::system(instruction),
        ChatMessage::user(request.prompt),
    ];

    match state
        .orchestrator
        .run_oneshot(&account_id, &request.model, messages, request.max_tokens)
        .await
    {
        Ok(completion) => Json(completion).into_response(),
        Err(error) => error_response(&error),
    }
}

/// POST /v1/helpers/enhance-prompt
pub async fn handle_enhance_prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HelperRequest>,
) -> Response {
    run_helper(&state, &headers, request, ENHANCE_INSTRUCTION).await
}

/// POST /v1/helpers/generate-example
pub async fn handle_generate_example(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HelperRequest>,
) -> Response {
    run_helper(&state, &headers, request, EXAMPLE_INSTRUCTION).await
}

/// GET /health
pub async fn handle_health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}
