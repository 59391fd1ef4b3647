use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_budget_mode, parse_environment, parse_f64,
    parse_i64, parse_ocr_provider, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    BaiduOcrSettings, BudgetSettings, ConfigError, DatabaseSettings, LlmSettings,
    OcrProviderKind, OcrSettings, RedisSettings, RuntimeSettings, S3Settings, ServerHost,
    ServerPort, ServerSettings, Settings, TelemetrySettings, WorkerSettings,
};

const BAIDU_OAUTH_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";
const BAIDU_OCR_API_URL: &str = "https://aip.baidubce.com/rest/2.0/ocr/v1/general_basic";

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("GRADER_HOST", "0.0.0.0");
        let port = env_or_default("GRADER_PORT", "8000");

        let environment =
            parse_environment(env_optional("GRADER_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("GRADER_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "essay_grader");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "essay_grader");
        let database_url = env_optional("DATABASE_URL");

        let redis_url = env_optional("REDIS_URL");
        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let s3_endpoint = env_or_default("S3_ENDPOINT", "");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "essay-submissions");
        let s3_region = env_or_default("S3_REGION", "us-east-1");

        let llm_provider_name = env_optional("LLM_PROVIDER_NAME")
            .or_else(|| env_optional("LLM_PROVIDER"))
            .unwrap_or_else(|| "llm".to_string());
        let llm_base_url = env_or_default("LLM_BASE_URL", "");
        let llm_api_key = env_or_default("LLM_API_KEY", "");
        let llm_model = env_or_default("LLM_MODEL", "");
        let llm_cheaper_model = env_or_default("LLM_MODEL_CHEAPER", "");
        let llm_quality_model = env_or_default("LLM_MODEL_QUALITY", "");
        let llm_max_tokens = parse_u32("LLM_MAX_TOKENS", env_or_default("LLM_MAX_TOKENS", "800"))?;
        let llm_temperature =
            parse_f64("LLM_TEMPERATURE", env_or_default("LLM_TEMPERATURE", "0.2"))?;
        let llm_timeout_ms =
            parse_u64("LLM_TIMEOUT_MS", env_or_default("LLM_TIMEOUT_MS", "20000"))?;
        let llm_max_input_chars =
            parse_u64("LLM_MAX_INPUT_CHARS", env_or_default("LLM_MAX_INPUT_CHARS", "6000"))?;

        let ocr_provider = parse_ocr_provider(env_optional("OCR_PROVIDER"))?;
        let baidu_api_key = env_or_default("BAIDU_OCR_API_KEY", "");
        let baidu_secret_key = env_or_default("BAIDU_OCR_SECRET_KEY", "");
        let baidu_token_ttl = parse_u64(
            "BAIDU_OCR_TOKEN_CACHE_TTL",
            env_or_default("BAIDU_OCR_TOKEN_CACHE_TTL", "2592000"),
        )?;
        let baidu_oauth_url = env_or_default("BAIDU_OCR_OAUTH_URL", BAIDU_OAUTH_URL);
        let baidu_api_url = env_or_default("BAIDU_OCR_API_URL", BAIDU_OCR_API_URL);
        let baidu_max_retries =
            parse_u32("BAIDU_OCR_MAX_RETRIES", env_or_default("BAIDU_OCR_MAX_RETRIES", "2"))?;
        let baidu_timeout_seconds = parse_u64(
            "BAIDU_OCR_TIMEOUT_SECONDS",
            env_or_default("BAIDU_OCR_TIMEOUT_SECONDS", "30"),
        )?;
        let ocr_retry_base_ms =
            parse_u64("OCR_RETRY_BASE_MS", env_or_default("OCR_RETRY_BASE_MS", "1000"))?;
        let ocr_base_url = env_or_default("OCR_BASE_URL", "http://localhost:8000");
        let ocr_timeout_ms =
            parse_u64("OCR_TIMEOUT_MS", env_or_default("OCR_TIMEOUT_MS", "10000"))?;

        let budget_enabled =
            env_optional("BUDGET_ENABLED").map(|value| parse_bool(&value)).unwrap_or(true);
        let daily_call_limit =
            parse_i64("LLM_DAILY_CALL_LIMIT", env_or_default("LLM_DAILY_CALL_LIMIT", "400"))?;
        let budget_mode = parse_budget_mode(env_optional("BUDGET_MODE"));

        let worker_concurrency =
            parse_u32("WORKER_CONCURRENCY", env_or_default("WORKER_CONCURRENCY", "5"))?;
        let worker_poll_interval_ms = parse_u64(
            "WORKER_POLL_INTERVAL_MS",
            env_or_default("WORKER_POLL_INTERVAL_MS", "2000"),
        )?;
        let config_cache_ttl_seconds = parse_u64(
            "CONFIG_CACHE_TTL_SECONDS",
            env_or_default("CONFIG_CACHE_TTL_SECONDS", "15"),
        )?;
        let regrade_stale_minutes =
            parse_u64("REGRADE_STALE_MINUTES", env_or_default("REGRADE_STALE_MINUTES", "10"))?;

        let log_level = env_or_default("GRADER_LOG_LEVEL", "info");
        let json = env_optional("GRADER_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                url: redis_url,
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
            },
            llm: LlmSettings {
                provider_name: llm_provider_name,
                base_url: llm_base_url,
                api_key: llm_api_key,
                model: llm_model,
                cheaper_model: llm_cheaper_model,
                quality_model: llm_quality_model,
                max_tokens: llm_max_tokens,
                temperature: llm_temperature,
                timeout_ms: llm_timeout_ms,
                max_input_chars: llm_max_input_chars as usize,
            },
            ocr: OcrSettings {
                provider: ocr_provider,
                baidu: BaiduOcrSettings {
                    api_key: baidu_api_key,
                    secret_key: baidu_secret_key,
                    token_cache_ttl_seconds: baidu_token_ttl,
                    oauth_url: baidu_oauth_url,
                    api_url: baidu_api_url,
                    max_retries: baidu_max_retries,
                    timeout_seconds: baidu_timeout_seconds,
                    retry_base_ms: ocr_retry_base_ms,
                },
                service_base_url: ocr_base_url,
                service_timeout_ms: ocr_timeout_ms,
            },
            budget: BudgetSettings {
                enabled: budget_enabled,
                daily_call_limit,
                mode: budget_mode,
            },
            worker: WorkerSettings {
                concurrency: worker_concurrency as usize,
                poll_interval_ms: worker_poll_interval_ms,
                config_cache_ttl_seconds,
                regrade_stale_minutes,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn llm(&self) -> &LlmSettings {
        &self.llm
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn budget(&self) -> &BudgetSettings {
        &self.budget
    }

    pub(crate) fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LLM_MAX_TOKENS",
                value: "0".to_string(),
            });
        }

        if self.llm.max_input_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LLM_MAX_INPUT_CHARS",
                value: "0".to_string(),
            });
        }

        if self.llm.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LLM_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.llm.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("LLM_BASE_URL"));
        }
        if self.llm.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("LLM_API_KEY"));
        }
        if self.ocr.provider == OcrProviderKind::Baidu
            && (self.ocr.baidu.api_key.is_empty() || self.ocr.baidu.secret_key.is_empty())
        {
            return Err(ConfigError::MissingSecret("BAIDU_OCR_API_KEY/BAIDU_OCR_SECRET_KEY"));
        }
        if self.s3.access_key.is_empty() || self.s3.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }

        Ok(())
    }
}
