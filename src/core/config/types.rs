use thiserror::Error;

use crate::services::quota::BudgetMode;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) server: ServerSettings,
    pub(super) runtime: RuntimeSettings,
    pub(super) database: DatabaseSettings,
    pub(super) redis: RedisSettings,
    pub(super) s3: S3Settings,
    pub(super) llm: LlmSettings,
    pub(super) ocr: OcrSettings,
    pub(super) budget: BudgetSettings,
    pub(super) worker: WorkerSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(super) host: ServerHost,
    pub(super) port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseSettings {
    pub(crate) postgres_server: String,
    pub(crate) postgres_port: u16,
    pub(crate) postgres_user: String,
    pub(crate) postgres_password: String,
    pub(crate) postgres_db: String,
    pub(crate) database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RedisSettings {
    pub(crate) url: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) db: u16,
    pub(crate) password: String,
}

#[derive(Debug, Clone)]
pub(crate) struct S3Settings {
    pub(crate) endpoint: String,
    pub(crate) access_key: String,
    pub(crate) secret_key: String,
    pub(crate) bucket: String,
    pub(crate) region: String,
}

/// Static LLM defaults. Dynamic `llm` / `llmProviders` blobs override these at runtime.
#[derive(Debug, Clone)]
pub(crate) struct LlmSettings {
    pub(crate) provider_name: String,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) cheaper_model: String,
    pub(crate) quality_model: String,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
    pub(crate) timeout_ms: u64,
    pub(crate) max_input_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OcrProviderKind {
    Baidu,
    Service,
}

impl OcrProviderKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Baidu => "baidu",
            Self::Service => "service",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OcrSettings {
    pub(crate) provider: OcrProviderKind,
    pub(crate) baidu: BaiduOcrSettings,
    pub(crate) service_base_url: String,
    pub(crate) service_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct BaiduOcrSettings {
    pub(crate) api_key: String,
    pub(crate) secret_key: String,
    pub(crate) token_cache_ttl_seconds: u64,
    pub(crate) oauth_url: String,
    pub(crate) api_url: String,
    pub(crate) max_retries: u32,
    pub(crate) timeout_seconds: u64,
    pub(crate) retry_base_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct BudgetSettings {
    pub(crate) enabled: bool,
    pub(crate) daily_call_limit: i64,
    pub(crate) mode: BudgetMode,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub(crate) concurrency: usize,
    pub(crate) poll_interval_ms: u64,
    pub(crate) config_cache_ttl_seconds: u64,
    pub(crate) regrade_stale_minutes: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(pub(super) String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(pub(super) u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub(crate) fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl RedisSettings {
    pub(crate) fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl LlmSettings {
    pub(crate) fn retry_max_tokens(&self) -> u32 {
        scale_tokens(self.max_tokens, 7).max(200)
    }

    pub(crate) fn short_max_tokens(&self) -> u32 {
        scale_tokens(self.max_tokens, 9).max(600)
    }
}

/// `tokens × tenths / 10`, computed wide so large limits cannot overflow.
fn scale_tokens(tokens: u32, tenths: u64) -> u32 {
    let scaled = u64::from(tokens) * tenths / 10;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

impl ServerHost {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }

        Ok(Self(value))
    }
}

impl ServerPort {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }

        Ok(Self(parsed))
    }
}
