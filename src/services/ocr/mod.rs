pub(crate) mod baidu;
pub(crate) mod http_service;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::{OcrProviderKind, Settings};
use crate::core::dynamic_config::DynamicConfig;
use crate::core::time::Clock;

pub(crate) use baidu::BaiduOcrProvider;
pub(crate) use http_service::HttpOcrProvider;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum OcrError {
    #[error("OCR authentication failed: {0}")]
    Auth(String),
    #[error("OCR rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("OCR daily limit exceeded: {0}")]
    DailyLimit(String),
    #[error("OCR request timed out: {0}")]
    Timeout(String),
    #[error("OCR error: {0}")]
    Api(String),
}

impl OcrError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "OCR_TIMEOUT",
            _ => "OCR_ERROR",
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited(_) => "rate_limited",
            Self::DailyLimit(_) => "daily_limit",
            Self::Timeout(_) => "timeout",
            Self::Api(_) => "error",
        }
    }
}

/// Turns one photographed page into plain text. Empty text is a valid result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

pub(crate) fn from_settings(
    settings: &Settings,
    config: DynamicConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn OcrProvider>> {
    let provider: Arc<dyn OcrProvider> = match settings.ocr().provider {
        OcrProviderKind::Baidu => {
            Arc::new(BaiduOcrProvider::new(settings.ocr().baidu.clone(), config, clock)?)
        }
        OcrProviderKind::Service => Arc::new(HttpOcrProvider::new(settings.ocr(), config)?),
    };

    tracing::info!(provider = settings.ocr().provider.as_str(), "OCR provider configured");
    Ok(provider)
}

fn record_request(provider: &'static str, result: &Result<String, OcrError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(err) => err.label(),
    };
    metrics::counter!("ocr_requests_total", "provider" => provider, "status" => status)
        .increment(1);
}
