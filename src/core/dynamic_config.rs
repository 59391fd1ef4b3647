use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::core::time::Clock;

pub(crate) const LLM_KEY: &str = "llm";
pub(crate) const LLM_PROVIDERS_KEY: &str = "llmProviders";
pub(crate) const BUDGET_KEY: &str = "budget";
pub(crate) const OCR_KEY: &str = "ocr";
pub(crate) const BAIDU_OCR_KEY: &str = "baiduOcr";

/// Backing store for runtime-editable configuration blobs.
#[async_trait]
pub(crate) trait ConfigSource: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn store(&self, key: &str, value: &Value) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<Value>,
    fetched_at: OffsetDateTime,
}

#[derive(Clone)]
pub(crate) struct DynamicConfig {
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl DynamicConfig {
    pub(crate) fn new(source: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { source, clock, ttl, cache: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub(crate) async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_utc();
        let cached = { self.cache.read().await.get(key).cloned() };

        if let Some(entry) = &cached {
            if self.is_fresh(entry, now) {
                return entry.value.clone();
            }
        }

        match self.source.load(key).await {
            Ok(value) => {
                let mut cache = self.cache.write().await;
                cache.insert(key.to_string(), CacheEntry { value: value.clone(), fetched_at: now });
                value
            }
            Err(err) => {
                tracing::warn!(
                    key,
                    error = %err,
                    "Failed to load dynamic config; using cached value"
                );
                cached.and_then(|entry| entry.value)
            }
        }
    }

    /// Deserializes the blob under `key`. A malformed blob is logged and treated as absent.
    pub(crate) async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(key, error = %err, "Ignoring malformed dynamic config blob");
                None
            }
        }
    }

    pub(crate) async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.source.store(key, &value).await?;
        let now = self.clock.now_utc();
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), CacheEntry { value: Some(value), fetched_at: now });
        Ok(())
    }

    fn is_fresh(&self, entry: &CacheEntry, now: OffsetDateTime) -> bool {
        let age = now - entry.fetched_at;
        age.is_negative() || age < self.ttl
    }
}
