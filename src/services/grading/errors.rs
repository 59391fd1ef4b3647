use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GradingErrorCode {
    SchemaInvalid,
    Timeout,
    ApiError,
    QuotaExceeded,
}

impl GradingErrorCode {
    /// Code persisted on a failed submission.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::SchemaInvalid => "LLM_SCHEMA_INVALID",
            Self::Timeout => "LLM_TIMEOUT",
            Self::ApiError => "LLM_API_ERROR",
            Self::QuotaExceeded => "LLM_QUOTA_EXCEEDED",
        }
    }

    pub(crate) fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::ApiError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub(crate) struct GradingError {
    pub(crate) code: GradingErrorCode,
    pub(crate) message: String,
}

impl GradingError {
    pub(crate) fn new(code: GradingErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub(crate) fn schema_invalid(message: impl Into<String>) -> Self {
        Self::new(GradingErrorCode::SchemaInvalid, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(GradingErrorCode::Timeout, message)
    }

    pub(crate) fn api(message: impl Into<String>) -> Self {
        Self::new(GradingErrorCode::ApiError, message)
    }

    pub(crate) fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(GradingErrorCode::QuotaExceeded, message)
    }
}
