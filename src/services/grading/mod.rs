pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod parse;
pub(crate) mod schema;

use std::sync::Arc;

use serde::Serialize;

use crate::core::config::LlmSettings;
use crate::services::llm::prompts::DEFAULT_RUBRIC;
use crate::services::llm::{GradeEssayParams, GradingMode, LlmProvider, ProviderInfo};
use crate::services::quota::{BudgetMode, QuotaGate};

use attempts::{AttemptKind, Degradation, DegradeReason, GradingRequest, TokenBudgets, Transition};
use errors::GradingError;
use schema::GradingResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GradeOptions {
    pub(crate) need_rewrite: Option<bool>,
    pub(crate) mode: Option<GradingMode>,
    pub(crate) rubric: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingMeta {
    pub(crate) provider_name: String,
    pub(crate) model: String,
    pub(crate) degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) degrade_reason: Option<DegradeReason>,
    pub(crate) attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradingOutcome {
    pub(crate) result: GradingResult,
    pub(crate) meta: GradingMeta,
}

struct CallOutcome {
    result: GradingResult,
    provider: ProviderInfo,
    degraded_by_budget: bool,
}

/// Turns essay text into a validated grading result, escalating through
/// cheaper and stricter attempts when the model misbehaves.
#[derive(Clone)]
pub(crate) struct GradingService {
    llm: Arc<dyn LlmProvider>,
    quota: Arc<dyn QuotaGate>,
    budgets: TokenBudgets,
    max_input_chars: usize,
}

impl GradingService {
    pub(crate) fn new(
        llm: Arc<dyn LlmProvider>,
        quota: Arc<dyn QuotaGate>,
        settings: &LlmSettings,
    ) -> Self {
        Self {
            llm,
            quota,
            budgets: TokenBudgets::from_settings(settings),
            max_input_chars: settings.max_input_chars,
        }
    }

    pub(crate) async fn grade(
        &self,
        text: &str,
        options: GradeOptions,
    ) -> Result<GradingOutcome, GradingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GradingError::schema_invalid("OCR text is empty"));
        }

        let mut degradation = Degradation::default();
        let mut kind = AttemptKind::Full;
        let mut input = trimmed.to_string();
        let char_count = trimmed.chars().count();
        if char_count > self.max_input_chars {
            input = trimmed.chars().take(self.max_input_chars).collect();
            degradation.mark(DegradeReason::InputTooLong);
            kind = AttemptKind::Degraded;
            tracing::info!(
                chars = char_count,
                limit = self.max_input_chars,
                "Essay truncated before grading"
            );
        }

        let request = GradingRequest {
            text: input,
            need_rewrite: options.need_rewrite.unwrap_or(false),
            mode: options.mode.unwrap_or_default(),
            rubric: options
                .rubric
                .filter(|rubric| !rubric.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RUBRIC.to_string()),
        };

        let mut attempt_count = 0u32;
        loop {
            attempt_count += 1;
            let params = kind.params(&request, &self.budgets);

            match self.call_model(params).await {
                Ok(outcome) => {
                    metrics::counter!(
                        "grading_attempts_total",
                        "attempt" => kind.as_str(),
                        "status" => "ok"
                    )
                    .increment(1);
                    if outcome.degraded_by_budget {
                        degradation.mark(DegradeReason::BudgetExceeded);
                    }
                    if let Some(reason) = kind.degrades_on_success() {
                        degradation.mark(reason);
                    }

                    return Ok(GradingOutcome {
                        result: outcome.result,
                        meta: GradingMeta {
                            provider_name: outcome.provider.provider_name,
                            model: outcome.provider.model,
                            degraded: degradation.is_degraded(),
                            degrade_reason: degradation.reason(),
                            attempt_count,
                        },
                    });
                }
                Err(err) => {
                    metrics::counter!(
                        "grading_attempts_total",
                        "attempt" => kind.as_str(),
                        "status" => err.code.as_str()
                    )
                    .increment(1);
                    tracing::warn!(
                        attempt = kind.as_str(),
                        attempt_count,
                        code = err.code.as_str(),
                        error = %err,
                        "Grading attempt failed"
                    );

                    match kind.on_failure(err.code) {
                        Transition::Next { kind: next, reason } => {
                            if let Some(reason) = reason {
                                degradation.mark(reason);
                            }
                            kind = next;
                        }
                        Transition::Fail => return Err(err),
                    }
                }
            }
        }
    }

    async fn call_model(&self, params: GradeEssayParams) -> Result<CallOutcome, GradingError> {
        let decision = self.quota.reserve_call().await;
        if decision.exceeded && decision.mode == BudgetMode::Hard {
            return Err(GradingError::quota_exceeded("Daily LLM quota exceeded"));
        }

        let mut params = params;
        let degraded_by_budget = decision.exceeded;
        if degraded_by_budget {
            tracing::warn!(
                count = decision.count,
                limit = decision.limit,
                mode = decision.mode.as_str(),
                "LLM budget exceeded; switching to short output"
            );
            params.short_mode = true;
            params.low_only = true;
            params.need_rewrite = false;
            params.max_tokens =
                Some(params.max_tokens.unwrap_or(self.budgets.default).min(self.budgets.short));
        }

        self.llm.refresh_config().await;
        let provider = self.llm.provider_info(&params);
        let raw = self.llm.grade_essay(&params).await?;
        let parsed = parse::parse_model_json(&raw)?;
        let result = schema::validate_result(parsed)?;

        Ok(CallOutcome { result, provider, degraded_by_budget })
    }
}
