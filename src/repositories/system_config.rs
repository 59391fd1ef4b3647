use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::dynamic_config::ConfigSource;
use crate::core::time::primitive_now_utc;

pub(crate) async fn find_value(pool: &PgPool, key: &str) -> Result<Option<Value>, sqlx::Error> {
    let row = sqlx::query_scalar::<_, Json<Value>>(
        "SELECT value
         FROM system_config
         WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|Json(value)| value))
}

pub(crate) async fn upsert(
    pool: &PgPool,
    key: &str,
    value: &Value,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO system_config (key, value, updated_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (key) DO UPDATE
         SET value = EXCLUDED.value,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(key)
    .bind(Json(value))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// `system_config` table as the backing store for dynamic configuration.
#[derive(Clone)]
pub(crate) struct PgConfigSource {
    pool: PgPool,
}

impl PgConfigSource {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigSource for PgConfigSource {
    async fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        find_value(&self.pool, key).await.with_context(|| format!("load system_config {key}"))
    }

    async fn store(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        upsert(&self.pool, key, value, primitive_now_utc())
            .await
            .with_context(|| format!("store system_config {key}"))
    }
}
