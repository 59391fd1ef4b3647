pub(crate) mod chat_completion;
pub(crate) mod config;
pub(crate) mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::grading::errors::GradingError;

pub(crate) use chat_completion::ChatCompletionProvider;
pub(crate) use config::LlmConfigResolver;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum GradingMode {
    #[default]
    Cheap,
    Quality,
}

impl GradingMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Cheap => "cheap",
            Self::Quality => "quality",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradeEssayParams {
    pub(crate) text: String,
    pub(crate) need_rewrite: bool,
    pub(crate) mode: GradingMode,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) temperature: Option<f64>,
    pub(crate) rubric: String,
    pub(crate) strict_json: bool,
    pub(crate) short_mode: bool,
    pub(crate) low_only: bool,
    pub(crate) model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProviderInfo {
    pub(crate) provider_name: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
}

/// Chat-completion style grader. Returns the raw model text; parsing is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LlmProvider: Send + Sync {
    async fn refresh_config(&self);
    fn provider_info(&self, params: &GradeEssayParams) -> ProviderInfo;
    async fn grade_essay(&self, params: &GradeEssayParams) -> Result<String, GradingError>;
}
