use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::config::BudgetSettings;
use crate::core::dynamic_config::{DynamicConfig, BUDGET_KEY};
use crate::core::redis::RedisHandle;
use crate::core::time::{utc_day_stamp, Clock};

const COUNTER_PREFIX: &str = "llm:calls:";
const COUNTER_TTL_SECONDS: u64 = 60 * 60 * 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BudgetMode {
    Soft,
    Hard,
}

impl BudgetMode {
    /// Anything other than `hard` (any case) is soft.
    pub(crate) fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("hard") {
            Self::Hard
        } else {
            Self::Soft
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuotaDecision {
    pub(crate) exceeded: bool,
    pub(crate) count: i64,
    pub(crate) limit: Option<i64>,
    pub(crate) mode: BudgetMode,
}

/// Atomic day counter. Implemented by Redis in production.
#[async_trait]
pub(crate) trait CallCounter: Send + Sync {
    async fn incr_with_expiry(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<i64>;
}

#[async_trait]
impl CallCounter for RedisHandle {
    async fn incr_with_expiry(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<i64> {
        Ok(RedisHandle::incr_with_expiry(self, key, ttl_seconds).await?)
    }
}

#[async_trait]
pub(crate) trait QuotaGate: Send + Sync {
    async fn reserve_call(&self) -> QuotaDecision;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BudgetOverride {
    enabled: Option<bool>,
    #[serde(alias = "dailyLimit")]
    daily_call_limit: Option<i64>,
    mode: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct BudgetPolicy {
    enabled: bool,
    limit: Option<i64>,
    mode: BudgetMode,
}

#[derive(Clone)]
pub(crate) struct QuotaTracker {
    counter: Arc<dyn CallCounter>,
    config: DynamicConfig,
    clock: Arc<dyn Clock>,
    defaults: BudgetSettings,
}

impl QuotaTracker {
    pub(crate) fn new(
        counter: Arc<dyn CallCounter>,
        config: DynamicConfig,
        clock: Arc<dyn Clock>,
        defaults: BudgetSettings,
    ) -> Self {
        Self { counter, config, clock, defaults }
    }

    pub(crate) fn counter_key(&self) -> String {
        format!("{COUNTER_PREFIX}{}", utc_day_stamp(self.clock.now_utc()))
    }

    async fn policy(&self) -> BudgetPolicy {
        let overrides = self.config.get_as::<BudgetOverride>(BUDGET_KEY).await.unwrap_or_default();
        let enabled = overrides.enabled.unwrap_or(self.defaults.enabled);
        let limit = overrides.daily_call_limit.unwrap_or(self.defaults.daily_call_limit);
        let mode = overrides
            .mode
            .as_deref()
            .map(BudgetMode::parse_lenient)
            .unwrap_or(self.defaults.mode);

        BudgetPolicy { enabled, limit: (limit > 0).then_some(limit), mode }
    }
}

#[async_trait]
impl QuotaGate for QuotaTracker {
    async fn reserve_call(&self) -> QuotaDecision {
        let key = self.counter_key();
        let policy = self.policy().await;

        let count = match self.counter.incr_with_expiry(&key, COUNTER_TTL_SECONDS).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    "Quota counter unavailable; allowing call"
                );
                return QuotaDecision {
                    exceeded: false,
                    count: 0,
                    limit: policy.limit,
                    mode: policy.mode,
                };
            }
        };

        if !policy.enabled {
            return QuotaDecision { exceeded: false, count, limit: None, mode: policy.mode };
        }

        let exceeded = policy.limit.is_some_and(|limit| count > limit);
        if exceeded {
            metrics::counter!("quota_exceeded_total", "mode" => policy.mode.as_str()).increment(1);
            tracing::warn!(
                count,
                limit = policy.limit,
                mode = policy.mode.as_str(),
                "Daily LLM call quota exceeded"
            );
        }

        QuotaDecision { exceeded, count, limit: policy.limit, mode: policy.mode }
    }
}
