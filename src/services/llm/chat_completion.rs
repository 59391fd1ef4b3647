use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

use super::config::{LlmConfigResolver, LlmRuntimeConfig};
use super::prompts::{build_system_prompt, build_user_prompt};
use super::{GradeEssayParams, GradingMode, LlmProvider, ProviderInfo};
use crate::core::time::Clock;
use crate::services::grading::errors::GradingError;

const CONFIG_REFRESH_TTL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_TOKENS: u32 = 800;
const DEFAULT_TEMPERATURE: f64 = 0.2;
const DEFAULT_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

enum SendFailure {
    Timeout,
    Transport(String),
    Status { status: u16, body: String },
}

struct RuntimeSlot {
    config: LlmRuntimeConfig,
    synced_at: Option<OffsetDateTime>,
}

/// OpenAI-compatible `/chat/completions` client.
pub(crate) struct ChatCompletionProvider {
    client: Client,
    resolver: LlmConfigResolver,
    clock: Arc<dyn Clock>,
    runtime: RwLock<RuntimeSlot>,
}

impl ChatCompletionProvider {
    pub(crate) fn new(resolver: LlmConfigResolver, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            resolver,
            clock,
            runtime: RwLock::new(RuntimeSlot {
                config: LlmRuntimeConfig::default(),
                synced_at: None,
            }),
        })
    }

    fn runtime_config(&self) -> LlmRuntimeConfig {
        let slot = self.runtime.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.config.clone()
    }

    fn needs_refresh(&self, now: OffsetDateTime) -> bool {
        let slot = self.runtime.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.synced_at {
            Some(synced_at) => now - synced_at >= CONFIG_REFRESH_TTL,
            None => true,
        }
    }

    async fn send(
        &self,
        url: &str,
        config: &LlmRuntimeConfig,
        payload: &Value,
    ) -> Result<CompletionResponse, SendFailure> {
        let timeout_ms =
            if config.timeout_ms == 0 { DEFAULT_TIMEOUT_MS } else { config.timeout_ms };
        let mut request =
            self.client.post(url).json(payload).timeout(Duration::from_millis(timeout_ms));
        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                SendFailure::Timeout
            } else {
                SendFailure::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                SendFailure::Timeout
            } else {
                SendFailure::Transport(err.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(SendFailure::Status { status: status.as_u16(), body });
        }

        serde_json::from_str(&body)
            .map_err(|err| SendFailure::Transport(format!("invalid response body: {err}")))
    }

    fn build_payload(
        config: &LlmRuntimeConfig,
        params: &GradeEssayParams,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Value {
        let max_tokens = params.max_tokens.unwrap_or(if config.max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            config.max_tokens
        });
        let temperature = params.temperature.unwrap_or(if config.temperature.is_finite() {
            config.temperature
        } else {
            DEFAULT_TEMPERATURE
        });

        let mut payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        if let Some(top_p) = config.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(presence_penalty) = config.presence_penalty {
            payload["presence_penalty"] = json!(presence_penalty);
        }
        if let Some(frequency_penalty) = config.frequency_penalty {
            payload["frequency_penalty"] = json!(frequency_penalty);
        }
        if let Some(stop) = &config.stop {
            payload["stop"] = json!(stop);
        }

        let json_object =
            params.strict_json || config.response_format.as_deref() == Some("json_object");
        if json_object {
            payload["response_format"] = json!({"type": "json_object"});
        }

        payload
    }

    fn record_usage(
        &self,
        config: &LlmRuntimeConfig,
        model: &str,
        usage: Option<&CompletionUsage>,
    ) {
        let Some(usage) = usage else {
            return;
        };

        if let Some(prompt) = usage.prompt_tokens {
            metrics::counter!("llm_tokens_total", "kind" => "prompt").increment(prompt);
        }
        if let Some(completion) = usage.completion_tokens {
            metrics::counter!("llm_tokens_total", "kind" => "completion").increment(completion);
        }

        let cost = config
            .prices
            .get(model)
            .and_then(|price| price.cost(usage.prompt_tokens, usage.completion_tokens));
        if let Some(cost) = cost {
            metrics::gauge!("llm_cost_total", "model" => model.to_string()).increment(cost);
        }

        tracing::info!(
            provider = %config.provider_name,
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            cost,
            "LLM usage recorded"
        );
    }
}

pub(crate) fn resolve_model(config: &LlmRuntimeConfig, params: &GradeEssayParams) -> String {
    if let Some(model) = params.model.as_deref().filter(|model| !model.is_empty()) {
        return model.to_string();
    }
    if params.mode == GradingMode::Quality {
        if let Some(model) = config.quality_model.as_deref().filter(|model| !model.is_empty()) {
            return model.to_string();
        }
    }
    if params.short_mode {
        if let Some(model) = config.cheaper_model.as_deref().filter(|model| !model.is_empty()) {
            return model.to_string();
        }
    }
    config.model.clone()
}

pub(crate) fn resolve_api_url(config: &LlmRuntimeConfig) -> String {
    let base = config.base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        return base.to_string();
    }

    match config.path.as_deref().map(str::trim).filter(|path| !path.is_empty()) {
        Some(path) if path.starts_with("http://") || path.starts_with("https://") => {
            path.to_string()
        }
        Some(path) if path.starts_with('/') => format!("{base}{path}"),
        Some(path) => format!("{base}/{path}"),
        None => format!("{base}/v1/chat/completions"),
    }
}

fn is_response_format_unsupported(status: u16, body: &str) -> bool {
    if status != 400 && status != 422 {
        return false;
    }
    let body = body.to_ascii_lowercase();
    body.contains("response_format") || body.contains("json_object") || body.contains("unsupported")
}

fn extract_content(response: &CompletionResponse) -> Option<String> {
    let choice = response.choices.first()?;
    choice
        .message
        .as_ref()
        .and_then(|message| message.content.clone())
        .or_else(|| choice.text.clone())
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

#[async_trait]
impl LlmProvider for ChatCompletionProvider {
    async fn refresh_config(&self) {
        let now = self.clock.now_utc();
        if !self.needs_refresh(now) {
            return;
        }

        let config = self.resolver.resolve().await;
        let mut slot = self.runtime.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.config = config;
        slot.synced_at = Some(now);
    }

    fn provider_info(&self, params: &GradeEssayParams) -> ProviderInfo {
        let config = self.runtime_config();
        let provider_name = if config.provider_name.is_empty() {
            "llm".to_string()
        } else {
            config.provider_name.clone()
        };
        ProviderInfo {
            provider_name,
            model: resolve_model(&config, params),
            base_url: config.base_url,
        }
    }

    async fn grade_essay(&self, params: &GradeEssayParams) -> Result<String, GradingError> {
        self.refresh_config().await;
        let config = self.runtime_config();

        if config.base_url.trim().is_empty() {
            return Err(GradingError::api("LLM_BASE_URL is not configured"));
        }
        let model = resolve_model(&config, params);
        if model.is_empty() {
            return Err(GradingError::api("LLM_MODEL is not configured"));
        }

        let system_prompt = build_system_prompt(config.system_prompt.as_deref(), params);
        let user_prompt = build_user_prompt(params);
        let mut payload =
            Self::build_payload(&config, params, &model, &system_prompt, &user_prompt);
        let url = resolve_api_url(&config);

        let timer = Instant::now();
        let mut outcome = self.send(&url, &config, &payload).await;
        let mut used_fallback = false;

        if params.strict_json {
            if let Err(SendFailure::Status { status, body }) = &outcome {
                if is_response_format_unsupported(*status, body) {
                    tracing::warn!(
                        status,
                        model = %model,
                        "Provider rejected response_format; retrying without it"
                    );
                    if let Some(fields) = payload.as_object_mut() {
                        fields.remove("response_format");
                    }
                    outcome = self.send(&url, &config, &payload).await;
                    used_fallback = true;
                }
            }
        }

        let elapsed = timer.elapsed();
        metrics::histogram!("llm_duration_seconds").record(elapsed.as_secs_f64());

        let response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                let (status_label, error) = match failure {
                    SendFailure::Timeout => {
                        ("timeout", GradingError::timeout("LLM request timed out"))
                    }
                    SendFailure::Transport(reason) => {
                        ("error", GradingError::api(format!("LLM request failed: {reason}")))
                    }
                    SendFailure::Status { status, body } => {
                        ("error", GradingError::api(format!("LLM API error: {status} {body}")))
                    }
                };
                metrics::counter!("llm_calls_total", "status" => status_label).increment(1);
                tracing::warn!(
                    provider = %config.provider_name,
                    model = %model,
                    latency_ms = elapsed.as_millis() as u64,
                    used_fallback,
                    error = %error,
                    "LLM call failed"
                );
                return Err(error);
            }
        };

        let Some(content) = extract_content(&response) else {
            metrics::counter!("llm_calls_total", "status" => "error").increment(1);
            tracing::warn!(model = %model, "LLM response missing content");
            return Err(GradingError::api("LLM response missing content"));
        };

        metrics::counter!("llm_calls_total", "status" => "ok").increment(1);
        tracing::info!(
            provider = %config.provider_name,
            model = %model,
            latency_ms = elapsed.as_millis() as u64,
            used_fallback,
            "LLM call completed"
        );
        self.record_usage(&config, &model, response.usage.as_ref());

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{resolve_api_url, resolve_model, ChatCompletionProvider};
    use crate::core::dynamic_config::DynamicConfig;
    use crate::services::grading::errors::GradingErrorCode;
    use crate::services::llm::config::{LlmConfigResolver, LlmRuntimeConfig};
    use crate::services::llm::{GradeEssayParams, GradingMode, LlmProvider};
    use crate::test_support::{self, InMemoryConfigSource, ManualClock};

    fn params() -> GradeEssayParams {
        GradeEssayParams {
            text: "I has a dog.".to_string(),
            need_rewrite: false,
            mode: GradingMode::Cheap,
            max_tokens: None,
            temperature: None,
            rubric: String::new(),
            strict_json: false,
            short_mode: false,
            low_only: false,
            model: None,
        }
    }

    fn runtime() -> LlmRuntimeConfig {
        LlmRuntimeConfig {
            model: "base".to_string(),
            cheaper_model: Some("cheap".to_string()),
            quality_model: Some("quality".to_string()),
            ..LlmRuntimeConfig::default()
        }
    }

    struct Fixture {
        server: MockServer,
        source: Arc<InMemoryConfigSource>,
        clock: Arc<ManualClock>,
        provider: ChatCompletionProvider,
    }

    async fn fixture() -> Fixture {
        let server = MockServer::start().await;
        let source = Arc::new(InMemoryConfigSource::default());
        let clock = Arc::new(ManualClock::default());
        let config = DynamicConfig::new(source.clone(), clock.clone(), Duration::from_secs(15));
        let mut env = test_support::llm_settings();
        env.base_url = server.uri();
        let resolver = LlmConfigResolver::new(config, env);
        let provider = ChatCompletionProvider::new(resolver, clock.clone()).expect("provider");
        Fixture { server, source, clock, provider }
    }

    fn completion(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}
        }))
    }

    #[test]
    fn model_precedence() {
        let config = runtime();
        let mut params = params();
        assert_eq!(resolve_model(&config, &params), "base");

        params.short_mode = true;
        assert_eq!(resolve_model(&config, &params), "cheap");

        params.mode = GradingMode::Quality;
        assert_eq!(resolve_model(&config, &params), "quality");

        params.model = Some("explicit".to_string());
        assert_eq!(resolve_model(&config, &params), "explicit");
    }

    #[test]
    fn quality_mode_without_quality_model_uses_default() {
        let config = LlmRuntimeConfig { model: "base".to_string(), ..LlmRuntimeConfig::default() };
        let mut params = params();
        params.mode = GradingMode::Quality;
        assert_eq!(resolve_model(&config, &params), "base");
    }

    #[test]
    fn api_url_resolution() {
        let mut config = runtime();
        config.base_url = "https://api.example.com/".to_string();
        assert_eq!(resolve_api_url(&config), "https://api.example.com/v1/chat/completions");

        config.base_url = "https://api.example.com/v1/chat/completions/".to_string();
        assert_eq!(resolve_api_url(&config), "https://api.example.com/v1/chat/completions");

        config.base_url = "https://api.example.com".to_string();
        config.path = Some("api/v3/chat".to_string());
        assert_eq!(resolve_api_url(&config), "https://api.example.com/api/v3/chat");

        config.path = Some("/compat/chat".to_string());
        assert_eq!(resolve_api_url(&config), "https://api.example.com/compat/chat");

        config.path = Some("https://other.example.com/chat".to_string());
        assert_eq!(resolve_api_url(&config), "https://other.example.com/chat");
    }

    #[tokio::test]
    async fn grade_essay_posts_chat_completion() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "base-model", "max_tokens": 800})))
            .respond_with(completion("  {\"totalScore\": 70}  "))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let content = fixture.provider.grade_essay(&params()).await.expect("content");

        assert_eq!(content, "{\"totalScore\": 70}");
        let info = fixture.provider.provider_info(&params());
        assert_eq!(info.provider_name, "test-llm");
        assert_eq!(info.model, "base-model");
    }

    #[tokio::test]
    async fn strict_json_falls_back_without_response_format() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("response_format is not supported"),
            )
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(completion("{}"))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let mut params = params();
        params.strict_json = true;
        params.temperature = Some(0.0);

        assert_eq!(fixture.provider.grade_essay(&params).await.expect("content"), "{}");
    }

    #[tokio::test]
    async fn unrelated_bad_request_is_api_error() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("context length exceeded"))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let mut params = params();
        params.strict_json = true;
        let err = fixture.provider.grade_essay(&params).await.expect_err("api error");

        assert_eq!(err.code, GradingErrorCode::ApiError);
        assert!(err.message.contains("400"));
    }

    #[tokio::test]
    async fn slow_provider_maps_to_timeout() {
        let fixture = fixture().await;
        fixture.source.insert("llm", json!({"timeoutMs": 100}));
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(completion("{}").set_delay(Duration::from_millis(600)))
            .mount(&fixture.server)
            .await;

        let err = fixture.provider.grade_essay(&params()).await.expect_err("timeout");

        assert_eq!(err.code, GradingErrorCode::Timeout);
    }

    #[tokio::test]
    async fn legacy_text_choice_is_accepted() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"text": "{\"a\":1}"}]})),
            )
            .mount(&fixture.server)
            .await;

        assert_eq!(fixture.provider.grade_essay(&params()).await.expect("content"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn missing_content_is_api_error() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&fixture.server)
            .await;

        let err = fixture.provider.grade_essay(&params()).await.expect_err("api error");
        assert_eq!(err.code, GradingErrorCode::ApiError);
    }

    #[tokio::test]
    async fn undecodable_success_body_reports_cause() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&fixture.server)
            .await;

        let err = fixture.provider.grade_essay(&params()).await.expect_err("api error");

        assert_eq!(err.code, GradingErrorCode::ApiError);
        assert!(err.message.contains("invalid response body"), "{}", err.message);
    }

    #[tokio::test]
    async fn config_refresh_respects_ttl() {
        let fixture = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "base-model"})))
            .respond_with(completion("{}"))
            .expect(2)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "rotated-model"})))
            .respond_with(completion("{}"))
            .expect(1)
            .mount(&fixture.server)
            .await;

        fixture.provider.grade_essay(&params()).await.expect("first");
        fixture.source.insert("llm", json!({"model": "rotated-model"}));
        fixture.clock.advance(Duration::from_secs(5));
        fixture.provider.grade_essay(&params()).await.expect("cached config");
        fixture.clock.advance(Duration::from_secs(20));
        fixture.provider.grade_essay(&params()).await.expect("refreshed config");
    }

    #[tokio::test]
    async fn missing_base_url_is_api_error() {
        let source = Arc::new(InMemoryConfigSource::default());
        let clock = Arc::new(ManualClock::default());
        let config = DynamicConfig::new(source, clock.clone(), Duration::from_secs(15));
        let mut env = test_support::llm_settings();
        env.base_url = String::new();
        let provider = ChatCompletionProvider::new(LlmConfigResolver::new(config, env), clock)
            .expect("provider");

        let err = provider.grade_essay(&params()).await.expect_err("api error");

        assert_eq!(err.code, GradingErrorCode::ApiError);
        assert!(err.message.contains("LLM_BASE_URL"));
    }
}
