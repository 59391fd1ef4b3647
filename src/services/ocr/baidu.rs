use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{record_request, OcrError, OcrProvider};
use crate::core::config::BaiduOcrSettings;
use crate::core::dynamic_config::{DynamicConfig, BAIDU_OCR_KEY};
use crate::core::time::Clock;

const PROVIDER: &str = "baidu";

const TOKEN_EXPIRED: i64 = 3;
const TOKEN_INVALID: i64 = 4;
const QPS_LIMIT: i64 = 17;
const QPS_LIMIT_MONTH: i64 = 18;
const CONCURRENCY_LIMIT: i64 = 19;
const DAILY_LIMIT: i64 = 110;

fn is_rate_limit(code: i64) -> bool {
    matches!(code, QPS_LIMIT | QPS_LIMIT_MONTH | CONCURRENCY_LIMIT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BaiduOverride {
    api_key: Option<String>,
    secret_key: Option<String>,
    token_cache_ttl: Option<u64>,
}

#[derive(Debug, Clone)]
struct Credentials {
    api_key: String,
    secret_key: String,
    token_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    api_key: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WordsItem {
    words: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    words_result: Vec<WordsItem>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

pub(crate) struct BaiduOcrProvider {
    client: Client,
    config: DynamicConfig,
    clock: Arc<dyn Clock>,
    defaults: BaiduOcrSettings,
    token: Mutex<Option<CachedToken>>,
}

impl BaiduOcrProvider {
    pub(crate) fn new(
        defaults: BaiduOcrSettings,
        config: DynamicConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build Baidu OCR HTTP client")?;

        Ok(Self { client, config, clock, defaults, token: Mutex::new(None) })
    }

    async fn credentials(&self) -> Credentials {
        let overrides =
            self.config.get_as::<BaiduOverride>(BAIDU_OCR_KEY).await.unwrap_or_default();
        let pick = |value: Option<String>, fallback: &str| {
            value
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        Credentials {
            api_key: pick(overrides.api_key, &self.defaults.api_key),
            secret_key: pick(overrides.secret_key, &self.defaults.secret_key),
            token_cache_ttl_seconds: overrides
                .token_cache_ttl
                .unwrap_or(self.defaults.token_cache_ttl_seconds),
        }
    }

    async fn access_token(&self, credentials: &Credentials) -> Result<String, OcrError> {
        let mut cached = self.token.lock().await;
        let now = self.clock.now_utc();

        if let Some(token) = cached.as_ref() {
            if token.api_key == credentials.api_key && token.expires_at > now {
                return Ok(token.token.clone());
            }
        }

        let response = self
            .client
            .post(&self.defaults.oauth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.api_key.as_str()),
                ("client_secret", credentials.secret_key.as_str()),
            ])
            .timeout(Duration::from_secs(self.defaults.timeout_seconds))
            .send()
            .await
            .map_err(|err| OcrError::Auth(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Auth(format!("token request returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| OcrError::Auth(format!("token response unreadable: {err}")))?;

        if let Some(error) = body.error {
            let description = body.error_description.unwrap_or_default();
            return Err(OcrError::Auth(format!("{error} - {description}")));
        }

        let Some(token) = body.access_token.filter(|token| !token.is_empty()) else {
            return Err(OcrError::Auth("no access_token in response".to_string()));
        };

        let ttl = body
            .expires_in
            .map_or(credentials.token_cache_ttl_seconds, |expires_in| {
                expires_in.min(credentials.token_cache_ttl_seconds)
            });
        // A TTL past the representable date range is not cached at all.
        let expires_at = i64::try_from(ttl)
            .ok()
            .and_then(|seconds| now.checked_add(time::Duration::seconds(seconds)));
        *cached = match expires_at {
            Some(expires_at) => Some(CachedToken {
                token: token.clone(),
                api_key: credentials.api_key.clone(),
                expires_at,
            }),
            None => {
                tracing::warn!(ttl, "Baidu OCR token TTL out of range; token not cached");
                None
            }
        };

        tracing::info!(expires_in = ttl, "Baidu OCR access token refreshed");
        Ok(token)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    async fn map_error_code(&self, code: i64, message: Option<String>) -> OcrError {
        let message = message.unwrap_or_else(|| format!("OCR error code: {code}"));

        match code {
            code if is_rate_limit(code) => OcrError::RateLimited(message),
            DAILY_LIMIT => OcrError::DailyLimit(message),
            TOKEN_EXPIRED | TOKEN_INVALID => {
                self.clear_token().await;
                OcrError::Auth(format!("invalid token: {message}"))
            }
            _ => OcrError::Api(message),
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.defaults.retry_base_ms.saturating_mul(2_u64.saturating_pow(attempt));
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    async fn recognize_inner(&self, image: &[u8]) -> Result<String, OcrError> {
        let credentials = self.credentials().await;
        if credentials.api_key.is_empty() || credentials.secret_key.is_empty() {
            return Err(OcrError::Auth(
                "BAIDU_OCR_API_KEY and BAIDU_OCR_SECRET_KEY must be configured".to_string(),
            ));
        }

        let token = self.access_token(&credentials).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let max_retries = self.defaults.max_retries;
        let mut attempt = 0;

        loop {
            let sent = self
                .client
                .post(&self.defaults.api_url)
                .query(&[("access_token", token.as_str())])
                .form(&[("image", encoded.as_str())])
                .timeout(Duration::from_secs(self.defaults.timeout_seconds))
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    if attempt < max_retries {
                        tracing::warn!(attempt, error = %err, "Baidu OCR request failed; retrying");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    if err.is_timeout() {
                        return Err(OcrError::Timeout(err.to_string()));
                    }
                    return Err(OcrError::Api(err.to_string()));
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|err| {
                if err.is_timeout() {
                    OcrError::Timeout(err.to_string())
                } else {
                    OcrError::Api(format!("failed to read response: {err}"))
                }
            })?;

            if !status.is_success() {
                return Err(OcrError::Api(format!("status {status}: {body}")));
            }

            let parsed: RecognizeResponse = serde_json::from_str(&body)
                .map_err(|err| OcrError::Api(format!("invalid response body: {err}")))?;

            match parsed.error_code.filter(|code| *code != 0) {
                Some(code) if is_rate_limit(code) && attempt < max_retries => {
                    tracing::warn!(attempt, code, "Baidu OCR rate limited; retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Some(code) => return Err(self.map_error_code(code, parsed.error_msg).await),
                None => {
                    let text = parsed
                        .words_result
                        .into_iter()
                        .map(|item| item.words)
                        .collect::<Vec<_>>()
                        .join("\n");
                    return Ok(text.trim().to_string());
                }
            }
        }
    }
}

#[async_trait]
impl OcrProvider for BaiduOcrProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let result = self.recognize_inner(image).await;
        record_request(PROVIDER, &result);
        result
    }
}
