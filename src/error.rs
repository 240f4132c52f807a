use serde::Serialize;
use thiserror::Error;

// ─── Error taxonomy ──────────────────────────────────────────────────────────

/// Machine-readable error kinds surfaced to gateway callers.
///
/// Pre-flight kinds map to a non-streamed HTTP error response; upstream kinds
/// are emitted as the terminal frame of an already-open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // ── Pre-flight (no side effects) ─────────────────────────────────────
    InvalidRequest,
    StreamingOnly,
    AuthenticationFailed,
    ModelNotAllowed,
    DailyLimitExceeded,
    MonthlyLimitExceeded,

    // ── Mid-stream, upstream-caused ──────────────────────────────────────
    AuthOrConfig,
    ModelUnavailable,
    RateLimited,
    ProviderError,

    // ── Persistence / fallthrough ────────────────────────────────────────
    DatabaseOperationFailed,
    InternalError,
}

impl ErrorKind {
    /// HTTP status class for pre-flight (non-streamed) responses.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest | Self::StreamingOnly => 400,
            Self::AuthenticationFailed => 401,
            Self::ModelNotAllowed => 403,
            Self::DailyLimitExceeded | Self::MonthlyLimitExceeded | Self::RateLimited => 429,
            Self::AuthOrConfig | Self::ModelUnavailable | Self::ProviderError => 502,
            Self::DatabaseOperationFailed | Self::InternalError => 500,
        }
    }
}

// ─── Gateway error ───────────────────────────────────────────────────────────

/// A classified failure with a human-actionable message and optional
/// structured context (usage snapshots, allowed-model lists, reset instants).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(error: sqlx::Error) -> Self {
        Self::new(ErrorKind::DatabaseOperationFailed, error.to_string())
    }
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::DailyLimitExceeded).unwrap();
        assert_eq!(json, "\"DAILY_LIMIT_EXCEEDED\"");
        let json = serde_json::to_string(&ErrorKind::AuthOrConfig).unwrap();
        assert_eq!(json, "\"AUTH_OR_CONFIG\"");
    }

    #[test]
    fn preflight_status_classes() {
        assert_eq!(ErrorKind::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorKind::AuthenticationFailed.http_status(), 401);
        assert_eq!(ErrorKind::ModelNotAllowed.http_status(), 403);
        assert_eq!(ErrorKind::DailyLimitExceeded.http_status(), 429);
        assert_eq!(ErrorKind::MonthlyLimitExceeded.http_status(), 429);
        assert_eq!(ErrorKind::DatabaseOperationFailed.http_status(), 500);
    }

    #[test]
    fn details_attach_to_error() {
        let err = GatewayError::new(ErrorKind::ModelNotAllowed, "model not in tier")
            .with_details(serde_json::json!({"tier": "free"}));
        assert_eq!(err.kind, ErrorKind::ModelNotAllowed);
        assert_eq!(err.details.unwrap()["tier"], "free");
    }

    #[test]
    fn sqlx_error_maps_to_database_kind() {
        let err: GatewayError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind, ErrorKind::DatabaseOperationFailed);
    }
}
