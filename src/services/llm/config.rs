use std::collections::HashMap;

use serde::Deserialize;

use crate::core::config::LlmSettings;
use crate::core::dynamic_config::{DynamicConfig, LLM_KEY, LLM_PROVIDERS_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ModelPrice {
    pub(crate) price_in: Option<f64>,
    pub(crate) price_out: Option<f64>,
}

impl ModelPrice {
    /// Prices are per 1000 tokens.
    pub(crate) fn cost(
        &self,
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
    ) -> Option<f64> {
        let prompt = prompt_tokens.unwrap_or(0) as f64;
        let completion = completion_tokens.unwrap_or(0) as f64;
        if prompt == 0.0 && completion == 0.0 {
            return None;
        }
        let input = self.price_in.map_or(0.0, |price| prompt / 1000.0 * price);
        let output = self.price_out.map_or(0.0, |price| completion / 1000.0 * price);
        let total = input + output;
        total.is_finite().then_some(total)
    }
}

/// Effective chat-completion settings after merging dynamic config over the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LlmRuntimeConfig {
    pub(crate) provider_id: Option<String>,
    pub(crate) provider_name: String,
    pub(crate) base_url: String,
    pub(crate) path: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) model: String,
    pub(crate) cheaper_model: Option<String>,
    pub(crate) quality_model: Option<String>,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
    pub(crate) top_p: Option<f64>,
    pub(crate) presence_penalty: Option<f64>,
    pub(crate) frequency_penalty: Option<f64>,
    pub(crate) timeout_ms: u64,
    pub(crate) stop: Option<Vec<String>>,
    pub(crate) response_format: Option<String>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) prices: HashMap<String, ModelPrice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LlmDefaultsOverride {
    provider_name: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    cheaper_model: Option<String>,
    quality_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    presence_penalty: Option<f64>,
    frequency_penalty: Option<f64>,
    timeout_ms: Option<u64>,
    stop: Option<StopSequences>,
    response_format: Option<String>,
    system_prompt: Option<String>,
    active_provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProviderHeader {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProviderModel {
    name: String,
    price_in: Option<f64>,
    price_out: Option<f64>,
    is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProviderEntry {
    id: String,
    name: String,
    base_url: String,
    path: Option<String>,
    api_key: Option<String>,
    headers: Vec<ProviderHeader>,
    models: Vec<ProviderModel>,
    enabled: Option<bool>,
}

struct Defaults {
    provider_name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    cheaper_model: Option<String>,
    quality_model: Option<String>,
    max_tokens: u32,
    temperature: f64,
    top_p: Option<f64>,
    presence_penalty: Option<f64>,
    frequency_penalty: Option<f64>,
    timeout_ms: u64,
    stop: Option<Vec<String>>,
    response_format: Option<String>,
    system_prompt: Option<String>,
    active_provider_id: Option<String>,
}

fn normalize<S: AsRef<str>>(value: Option<S>) -> Option<String> {
    let value = value?;
    let trimmed = value.as_ref().trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize_stop(value: Option<StopSequences>) -> Option<Vec<String>> {
    let items: Vec<String> = match value? {
        StopSequences::One(item) => normalize(Some(&item)).into_iter().collect(),
        StopSequences::Many(items) => {
            items.iter().filter_map(|item| normalize(Some(item))).collect()
        }
    };
    (!items.is_empty()).then_some(items)
}

#[derive(Clone)]
pub(crate) struct LlmConfigResolver {
    config: DynamicConfig,
    env: LlmSettings,
}

impl LlmConfigResolver {
    pub(crate) fn new(config: DynamicConfig, env: LlmSettings) -> Self {
        Self { config, env }
    }

    async fn defaults(&self) -> Defaults {
        let overrides =
            self.config.get_as::<LlmDefaultsOverride>(LLM_KEY).await.unwrap_or_default();
        let env = &self.env;

        Defaults {
            provider_name: normalize(overrides.provider_name.as_deref())
                .unwrap_or_else(|| env.provider_name.clone()),
            base_url: normalize(overrides.base_url.as_deref())
                .unwrap_or_else(|| env.base_url.clone()),
            api_key: normalize(overrides.api_key.as_deref())
                .or_else(|| normalize(Some(&env.api_key))),
            model: normalize(overrides.model.as_deref()).unwrap_or_else(|| env.model.clone()),
            cheaper_model: normalize(overrides.cheaper_model.as_deref())
                .or_else(|| normalize(Some(&env.cheaper_model))),
            quality_model: normalize(overrides.quality_model.as_deref())
                .or_else(|| normalize(Some(&env.quality_model))),
            max_tokens: overrides.max_tokens.unwrap_or(env.max_tokens),
            temperature: overrides.temperature.unwrap_or(env.temperature),
            top_p: overrides.top_p,
            presence_penalty: overrides.presence_penalty,
            frequency_penalty: overrides.frequency_penalty,
            timeout_ms: overrides.timeout_ms.unwrap_or(env.timeout_ms),
            stop: normalize_stop(overrides.stop),
            response_format: normalize(overrides.response_format.as_deref()),
            system_prompt: normalize(overrides.system_prompt.as_deref()),
            active_provider_id: normalize(overrides.active_provider_id.as_deref()),
        }
    }

    async fn providers(&self, defaults: &Defaults) -> Vec<ProviderEntry> {
        let stored = self
            .config
            .get_as::<Vec<ProviderEntry>>(LLM_PROVIDERS_KEY)
            .await
            .unwrap_or_default();

        let enabled: Vec<ProviderEntry> = stored
            .into_iter()
            .map(|provider| {
                let id = provider.id.trim().to_string();
                ProviderEntry {
                    name: normalize(Some(&provider.name))
                        .or_else(|| normalize(Some(&id)))
                        .unwrap_or_else(|| "provider".to_string()),
                    base_url: provider.base_url.trim().to_string(),
                    path: normalize(provider.path.as_deref()),
                    api_key: normalize(provider.api_key.as_deref()),
                    id,
                    ..provider
                }
            })
            .filter(|provider| !provider.id.is_empty() && !provider.base_url.is_empty())
            .filter(|provider| provider.enabled != Some(false))
            .collect();

        if !enabled.is_empty() || defaults.base_url.is_empty() {
            return enabled;
        }

        vec![ProviderEntry {
            id: "default".to_string(),
            name: defaults.provider_name.clone(),
            base_url: defaults.base_url.clone(),
            api_key: defaults.api_key.clone(),
            models: if defaults.model.is_empty() {
                Vec::new()
            } else {
                vec![ProviderModel {
                    name: defaults.model.clone(),
                    is_default: Some(true),
                    ..ProviderModel::default()
                }]
            },
            enabled: Some(true),
            ..ProviderEntry::default()
        }]
    }

    pub(crate) async fn resolve(&self) -> LlmRuntimeConfig {
        let defaults = self.defaults().await;
        let providers = self.providers(&defaults).await;

        let active = defaults
            .active_provider_id
            .as_deref()
            .and_then(|id| providers.iter().find(|provider| provider.id == id))
            .or_else(|| providers.first());

        let default_model = active.and_then(|provider| {
            provider
                .models
                .iter()
                .find(|model| model.is_default == Some(true))
                .or_else(|| provider.models.first())
                .map(|model| model.name.clone())
        });
        let model = if defaults.model.is_empty() {
            default_model.unwrap_or_default()
        } else {
            defaults.model.clone()
        };

        let headers = active
            .map(|provider| {
                provider
                    .headers
                    .iter()
                    .filter_map(|header| {
                        Some((normalize(Some(&header.key))?, normalize(Some(&header.value))?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let prices = active
            .map(|provider| {
                provider
                    .models
                    .iter()
                    .filter(|model| !model.name.is_empty())
                    .map(|model| {
                        (
                            model.name.clone(),
                            ModelPrice { price_in: model.price_in, price_out: model.price_out },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        LlmRuntimeConfig {
            provider_id: active.map(|provider| provider.id.clone()),
            provider_name: active
                .map(|provider| provider.name.clone())
                .unwrap_or_else(|| defaults.provider_name.clone()),
            base_url: active
                .map(|provider| provider.base_url.clone())
                .unwrap_or_else(|| defaults.base_url.clone()),
            path: active.and_then(|provider| provider.path.clone()),
            api_key: active.and_then(|provider| provider.api_key.clone()).or(defaults.api_key),
            headers,
            model,
            cheaper_model: defaults.cheaper_model,
            quality_model: defaults.quality_model,
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            presence_penalty: defaults.presence_penalty,
            frequency_penalty: defaults.frequency_penalty,
            timeout_ms: defaults.timeout_ms,
            stop: defaults.stop,
            response_format: defaults.response_format,
            system_prompt: defaults.system_prompt,
            prices,
        }
    }
}
