use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, ErrorKind, RedisError};
use tokio::sync::RwLock;

const INCR_WITH_EXPIRY: &str = r#"
    local current = redis.call("INCR", KEYS[1])
    if current == 1 then
        redis.call("EXPIRE", KEYS[1], ARGV[1])
    end
    return current
"#;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHealth {
    pub(crate) fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Healthy => "healthy".to_string(),
            Self::Disconnected => "disconnected".to_string(),
            Self::Unhealthy(reason) => format!("unhealthy: {reason}"),
        }
    }
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Atomically increments `key`, setting `ttl_seconds` only when the key is created.
    pub(crate) async fn incr_with_expiry(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<i64, RedisError> {
        let mut manager = self.connection().await?;
        let script = redis::Script::new(INCR_WITH_EXPIRY);
        script.key(key).arg(ttl_seconds as i64).invoke_async(&mut manager).await
    }

    pub(crate) async fn push_list(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut manager = self.connection().await?;
        cmd("LPUSH").arg(key).arg(value).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    pub(crate) async fn pop_list(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut manager = self.connection().await?;
        cmd("RPOP").arg(key).query_async::<_, Option<String>>(&mut manager).await
    }

    pub(crate) async fn list_len(&self, key: &str) -> Result<u64, RedisError> {
        let mut manager = self.connection().await?;
        cmd("LLEN").arg(key).query_async::<_, u64>(&mut manager).await
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        let manager = { self.manager.read().await.clone() };
        manager.ok_or_else(|| RedisError::from((ErrorKind::IoError, "redis is not connected")))
    }
}

#[cfg(test)]
mod tests {
    use super::RedisHandle;

    #[tokio::test]
    async fn commands_fail_fast_when_disconnected() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());

        assert!(redis.incr_with_expiry("llm:calls:20250101", 60).await.is_err());
        assert!(redis.push_list("queue:grading", "{}").await.is_err());
        assert!(redis.pop_list("queue:grading").await.is_err());
        assert!(!redis.health().await.is_healthy());
        assert_eq!(redis.health().await.describe(), "disconnected");
    }
}
