use serde::Serialize;

use super::errors::GradingErrorCode;
use crate::core::config::LlmSettings;
use crate::services::llm::{GradeEssayParams, GradingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TokenBudgets {
    pub(crate) default: u32,
    pub(crate) retry: u32,
    pub(crate) short: u32,
}

impl TokenBudgets {
    pub(crate) fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            default: settings.max_tokens,
            retry: settings.retry_max_tokens(),
            short: settings.short_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum DegradeReason {
    InputTooLong,
    BudgetExceeded,
    RetryFailed,
    SchemaRetryFailed,
    Degraded,
}

impl DegradeReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InputTooLong => "INPUT_TOO_LONG",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::RetryFailed => "RETRY_FAILED",
            Self::SchemaRetryFailed => "SCHEMA_RETRY_FAILED",
            Self::Degraded => "DEGRADED",
        }
    }
}

/// Once degraded, always degraded. The first reason recorded is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Degradation {
    reason: Option<DegradeReason>,
}

impl Degradation {
    pub(crate) fn mark(&mut self, reason: DegradeReason) {
        self.reason.get_or_insert(reason);
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.reason.is_some()
    }

    pub(crate) fn reason(&self) -> Option<DegradeReason> {
        self.reason
    }
}

/// What the caller asked for, before any attempt applies its overrides.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradingRequest {
    pub(crate) text: String,
    pub(crate) need_rewrite: bool,
    pub(crate) mode: GradingMode,
    pub(crate) rubric: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptKind {
    Full,
    TransientRetry,
    StrictSchemaRetry,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Next { kind: AttemptKind, reason: Option<DegradeReason> },
    Fail,
}

impl AttemptKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::TransientRetry => "transient_retry",
            Self::StrictSchemaRetry => "strict_schema_retry",
            Self::Degraded => "degraded",
        }
    }

    pub(crate) fn params(
        self,
        request: &GradingRequest,
        budgets: &TokenBudgets,
    ) -> GradeEssayParams {
        let base = GradeEssayParams {
            text: request.text.clone(),
            need_rewrite: request.need_rewrite,
            mode: request.mode,
            max_tokens: Some(budgets.default),
            temperature: None,
            rubric: request.rubric.clone(),
            strict_json: false,
            short_mode: false,
            low_only: false,
            model: None,
        };

        match self {
            Self::Full => base,
            Self::TransientRetry => GradeEssayParams { max_tokens: Some(budgets.retry), ..base },
            Self::StrictSchemaRetry => {
                GradeEssayParams { strict_json: true, temperature: Some(0.0), ..base }
            }
            Self::Degraded => GradeEssayParams {
                need_rewrite: false,
                max_tokens: Some(budgets.short),
                short_mode: true,
                low_only: true,
                strict_json: true,
                temperature: Some(0.0),
                ..base
            },
        }
    }

    /// Success of this attempt alone marks the result as degraded.
    pub(crate) fn degrades_on_success(self) -> Option<DegradeReason> {
        match self {
            Self::Degraded => Some(DegradeReason::Degraded),
            _ => None,
        }
    }

    pub(crate) fn on_failure(self, code: GradingErrorCode) -> Transition {
        if code == GradingErrorCode::QuotaExceeded {
            return Transition::Fail;
        }

        match self {
            Self::Full if code.is_transient() => {
                Transition::Next { kind: Self::TransientRetry, reason: None }
            }
            Self::Full => Transition::Next { kind: Self::StrictSchemaRetry, reason: None },
            Self::TransientRetry => Transition::Next {
                kind: Self::Degraded,
                reason: Some(DegradeReason::RetryFailed),
            },
            Self::StrictSchemaRetry => Transition::Next {
                kind: Self::Degraded,
                reason: Some(DegradeReason::SchemaRetryFailed),
            },
            Self::Degraded => Transition::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AttemptKind, Degradation, DegradeReason, GradingRequest, TokenBudgets, Transition,
    };
    use crate::services::grading::errors::GradingErrorCode;
    use crate::services::llm::GradingMode;

    fn request() -> GradingRequest {
        GradingRequest {
            text: "essay".to_string(),
            need_rewrite: true,
            mode: GradingMode::Quality,
            rubric: "rubric".to_string(),
        }
    }

    const BUDGETS: TokenBudgets = TokenBudgets { default: 800, retry: 560, short: 720 };

    #[test]
    fn full_attempt_keeps_request_settings() {
        let params = AttemptKind::Full.params(&request(), &BUDGETS);

        assert_eq!(params.max_tokens, Some(800));
        assert!(params.need_rewrite);
        assert_eq!(params.mode, GradingMode::Quality);
        assert!(!params.strict_json);
        assert!(!params.short_mode);
        assert_eq!(params.temperature, None);
    }

    #[test]
    fn retry_attempts_apply_overrides() {
        let retry = AttemptKind::TransientRetry.params(&request(), &BUDGETS);
        assert_eq!(retry.max_tokens, Some(560));

        let strict = AttemptKind::StrictSchemaRetry.params(&request(), &BUDGETS);
        assert_eq!(strict.max_tokens, Some(800));
        assert!(strict.strict_json);
        assert_eq!(strict.temperature, Some(0.0));

        let degraded = AttemptKind::Degraded.params(&request(), &BUDGETS);
        assert_eq!(degraded.max_tokens, Some(720));
        assert!(!degraded.need_rewrite);
        assert!(degraded.short_mode && degraded.low_only && degraded.strict_json);
    }

    #[test]
    fn transitions_follow_escalation() {
        assert_eq!(
            AttemptKind::Full.on_failure(GradingErrorCode::Timeout),
            Transition::Next { kind: AttemptKind::TransientRetry, reason: None }
        );
        assert_eq!(
            AttemptKind::Full.on_failure(GradingErrorCode::SchemaInvalid),
            Transition::Next { kind: AttemptKind::StrictSchemaRetry, reason: None }
        );
        assert_eq!(
            AttemptKind::TransientRetry.on_failure(GradingErrorCode::ApiError),
            Transition::Next {
                kind: AttemptKind::Degraded,
                reason: Some(DegradeReason::RetryFailed)
            }
        );
        assert_eq!(
            AttemptKind::StrictSchemaRetry.on_failure(GradingErrorCode::SchemaInvalid),
            Transition::Next {
                kind: AttemptKind::Degraded,
                reason: Some(DegradeReason::SchemaRetryFailed)
            }
        );
        assert_eq!(AttemptKind::Degraded.on_failure(GradingErrorCode::Timeout), Transition::Fail);
    }

    #[test]
    fn quota_exceeded_always_fails() {
        for kind in [
            AttemptKind::Full,
            AttemptKind::TransientRetry,
            AttemptKind::StrictSchemaRetry,
            AttemptKind::Degraded,
        ] {
            assert_eq!(kind.on_failure(GradingErrorCode::QuotaExceeded), Transition::Fail);
        }
    }

    #[test]
    fn degradation_keeps_first_reason() {
        let mut degradation = Degradation::default();
        assert!(!degradation.is_degraded());

        degradation.mark(DegradeReason::InputTooLong);
        degradation.mark(DegradeReason::Degraded);

        assert!(degradation.is_degraded());
        assert_eq!(degradation.reason(), Some(DegradeReason::InputTooLong));
    }
}
