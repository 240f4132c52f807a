use super::scrub::sanitize_provider_error;
use super::types::{CanonicalRequest, ProviderStream};
use crate::error::ErrorKind;

/// One upstream model family. Implementations translate the canonical
/// request into the family's wire format and normalize the family's
/// streaming frames back into canonical events.
///
/// The returned stream is lazy and finite, and is not restartable — retrying
/// requires a fresh call.
pub trait ProviderAdapter: Send + Sync {
    /// Family identifier (e.g. "openai", "anthropic").
    fn name(&self) -> &'static str;

    fn stream(&self, request: CanonicalRequest) -> ProviderStream;
}

/// Classify an upstream HTTP failure by status plus body inspection into the
/// stable taxonomy, with a user-actionable message. Shared by all families;
/// the body is scrubbed before it can reach a caller.
pub fn classify_upstream_failure(
    provider: &str,
    status: u16,
    body: &str,
    alternate_model: &str,
) -> (ErrorKind, String) {
    let detail = sanitize_provider_error(body);
    let lowered = body.to_ascii_lowercase();
    let model_missing = lowered.contains("model")
        && (lowered.contains("not found")
            || lowered.contains("does not exist")
            || lowered.contains("not_found"));

    match status {
        401 | 403 => (
            ErrorKind::AuthOrConfig,
            format!(
                "{provider} rejected the gateway's credentials ({status}). \
                 Check the configured API key. {detail}"
            ),
        ),
        404 => (
            ErrorKind::ModelUnavailable,
            format!(
                "{provider} does not serve the requested model ({status}). \
                 Pick another model from your tier. {detail}"
            ),
        ),
        _ if model_missing => (
            ErrorKind::ModelUnavailable,
            format!(
                "{provider} reported the model as unavailable. \
                 Pick another model from your tier. {detail}"
            ),
        ),
        429 => (
            ErrorKind::RateLimited,
            format!(
                "{provider} is rate-limiting requests ({status}). \
                 Retry shortly or switch to {alternate_model}. {detail}"
            ),
        ),
        _ => (
            ErrorKind::ProviderError,
            format!("{provider} request failed ({status}). {detail}"),
        ),
    }
}

/// Classification for transport-level failures (connect/read errors, stalls)
/// where no HTTP status is available.
pub fn classify_transport_failure(provider: &str, error: &reqwest::Error) -> (ErrorKind, String) {
    let kind = ErrorKind::ProviderError;
    let message = if error.is_timeout() {
        format!("{provider} did not respond in time; the request was aborted. Retry shortly.")
    } else if error.is_connect() {
        format!("{provider} is unreachable; the gateway could not connect. Retry shortly.")
    } else {
        format!(
            "{provider} stream failed: {}",
            sanitize_provider_error(&error.to_string())
        )
    };
    (kind, message)
}
