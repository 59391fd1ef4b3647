mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    BaiduOcrSettings, BudgetSettings, ConfigError, Environment, LlmSettings, OcrProviderKind,
    OcrSettings, Settings, WorkerSettings,
};
