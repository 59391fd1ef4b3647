use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{record_request, OcrError, OcrProvider};
use crate::core::config::OcrSettings;
use crate::core::dynamic_config::{DynamicConfig, OCR_KEY};

const PROVIDER: &str = "service";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServiceOverride {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    image_base64: &'a str,
    preprocess: bool,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Self-hosted OCR service speaking `POST {base}/ocr`.
pub(crate) struct HttpOcrProvider {
    client: Client,
    config: DynamicConfig,
    default_base_url: String,
    default_timeout_ms: u64,
}

impl HttpOcrProvider {
    pub(crate) fn new(settings: &OcrSettings, config: DynamicConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build OCR service HTTP client")?;

        Ok(Self {
            client,
            config,
            default_base_url: settings.service_base_url.clone(),
            default_timeout_ms: settings.service_timeout_ms,
        })
    }

    async fn endpoint(&self) -> (String, Duration) {
        let overrides = self.config.get_as::<ServiceOverride>(OCR_KEY).await.unwrap_or_default();
        let base = overrides
            .base_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.default_base_url.clone());
        let timeout_ms =
            overrides.timeout_ms.filter(|ms| *ms > 0).unwrap_or(self.default_timeout_ms);

        (format!("{}/ocr", base.trim_end_matches('/')), Duration::from_millis(timeout_ms))
    }

    async fn call(&self, url: &str, timeout: Duration, encoded: &str) -> Result<String, OcrError> {
        let response = self
            .client
            .post(url)
            .json(&OcrRequest { image_base64: encoded, preprocess: false })
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    let millis = timeout.as_millis();
                    OcrError::Timeout(format!("OCR service timed out after {millis}ms"))
                } else {
                    OcrError::Api(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Api(format!("status {status}: {body}")));
        }

        let parsed: OcrResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                OcrError::Timeout(err.to_string())
            } else {
                OcrError::Api(format!("invalid response body: {err}"))
            }
        })?;

        tracing::debug!(confidence = parsed.confidence, "OCR service responded");
        Ok(parsed.text.unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let (url, timeout) = self.endpoint().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let result = match self.call(&url, timeout, &encoded).await {
            Err(OcrError::Timeout(reason)) => {
                tracing::warn!(reason = %reason, "OCR service timeout; retrying once");
                self.call(&url, timeout, &encoded).await
            }
            other => other,
        };

        record_request(PROVIDER, &result);
        result
    }
}
