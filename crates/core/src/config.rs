use std::env;
use std::fs;
use std::path::PathBuf;

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub negotiation: NegotiationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Token the embedding process uses for its outbound channel adapter.
    pub api_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Business knobs of the negotiation engine. The counter step is a tunable
/// parameter, not a derived constant.
#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    pub counter_step_pct: Decimal,
    pub session_ttl_secs: u64,
    pub dedup_ttl_secs: u64,
    pub rate_limit_max_calls: u32,
    pub rate_limit_window_secs: u64,
    pub history_window: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub channel_api_token: Option<String>,
    pub counter_step_pct: Option<Decimal>,
    pub session_ttl_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://haggle.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig { api_token: String::new().into() },
            llm: LlmConfig { model: "gpt-4o-mini".to_string(), timeout_secs: 30, max_retries: 2 },
            negotiation: NegotiationConfig {
                counter_step_pct: Decimal::new(20, 2),
                session_ttl_secs: 86_400,
                dedup_ttl_secs: 3_600,
                rate_limit_max_calls: 10,
                rate_limit_window_secs: 60,
                history_window: 12,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    channel: Option<FileChannel>,
    llm: Option<FileLlm>,
    negotiation: Option<FileNegotiation>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileChannel {
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLlm {
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileNegotiation {
    counter_step_pct: Option<Decimal>,
    session_ttl_secs: Option<u64>,
    dedup_ttl_secs: Option<u64>,
    rate_limit_max_calls: Option<u32>,
    rate_limit_window_secs: Option<u64>,
    history_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(&options) {
            if path.exists() {
                let raw = fs::read_to_string(&path)
                    .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
                let file: FileConfig = toml::from_str(&raw)
                    .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
                config.merge_file(file);
            } else if options.require_file {
                return Err(ConfigError::MissingConfigFile(path));
            }
        }

        config.merge_env()?;
        config.merge_overrides(&options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, file: FileConfig) {
        if let Some(database) = file.database {
            merge(&mut self.database.url, database.url);
            merge(&mut self.database.max_connections, database.max_connections);
            merge(&mut self.database.timeout_secs, database.timeout_secs);
        }
        if let Some(channel) = file.channel {
            if let Some(token) = channel.api_token {
                self.channel.api_token = token.into();
            }
        }
        if let Some(llm) = file.llm {
            merge(&mut self.llm.model, llm.model);
            merge(&mut self.llm.timeout_secs, llm.timeout_secs);
            merge(&mut self.llm.max_retries, llm.max_retries);
        }
        if let Some(negotiation) = file.negotiation {
            merge(&mut self.negotiation.counter_step_pct, negotiation.counter_step_pct);
            merge(&mut self.negotiation.session_ttl_secs, negotiation.session_ttl_secs);
            merge(&mut self.negotiation.dedup_ttl_secs, negotiation.dedup_ttl_secs);
            merge(&mut self.negotiation.rate_limit_max_calls, negotiation.rate_limit_max_calls);
            merge(&mut self.negotiation.rate_limit_window_secs, negotiation.rate_limit_window_secs);
            merge(&mut self.negotiation.history_window, negotiation.history_window);
        }
        if let Some(logging) = file.logging {
            merge(&mut self.logging.level, logging.level);
            merge(&mut self.logging.format, logging.format);
        }
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("HAGGLE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("HAGGLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(token) = env::var("HAGGLE_CHANNEL_API_TOKEN") {
            self.channel.api_token = token.into();
        }
        if let Ok(step) = env::var("HAGGLE_COUNTER_STEP_PCT") {
            self.negotiation.counter_step_pct = step.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "HAGGLE_COUNTER_STEP_PCT".to_string(),
                    value: step,
                }
            })?;
        }
        Ok(())
    }

    fn merge_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.database_url {
            self.database.url = url.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(token) = &overrides.channel_api_token {
            self.channel.api_token = token.clone().into();
        }
        if let Some(step) = overrides.counter_step_pct {
            self.negotiation.counter_step_pct = step;
        }
        if let Some(ttl) = overrides.session_ttl_secs {
            self.negotiation.session_ttl_secs = ttl;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.negotiation.counter_step_pct <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "negotiation.counter_step_pct must be positive".to_string(),
            ));
        }
        if self.negotiation.counter_step_pct >= Decimal::from(1) {
            return Err(ConfigError::Validation(
                "negotiation.counter_step_pct must be a fraction below 1.0".to_string(),
            ));
        }
        if self.negotiation.session_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "negotiation.session_ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.negotiation.rate_limit_max_calls == 0 {
            return Err(ConfigError::Validation(
                "negotiation.rate_limit_max_calls must be non-zero".to_string(),
            ));
        }
        if self.negotiation.history_window == 0 {
            return Err(ConfigError::Validation(
                "negotiation.history_window must be non-zero".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn resolve_config_path(options: &LoadOptions) -> Option<PathBuf> {
    options
        .config_path
        .clone()
        .or_else(|| env::var("HAGGLE_CONFIG").ok().map(PathBuf::from))
        .or_else(|| Some(PathBuf::from("haggle.toml")))
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
