use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Chunk window settings cannot produce a terminating chunk sequence.
    #[error("Invalid chunk window: overlap {overlap} must be smaller than max words {max_words}")]
    InvalidChunkWindow {
        /// Configured words per chunk.
        max_words: usize,
        /// Configured overlap in words.
        overlap: usize,
    },
}

/// Runtime configuration for the docpipe server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Endpoint of the OCR extraction service (multipart upload).
    pub ocr_url: String,
    /// Endpoint of the summarization service.
    pub summarizer_url: String,
    /// Optional instruction forwarded with every summarization request.
    pub summarizer_prompt: Option<String>,
    /// Base URL of the REST metadata store; the in-memory store is used when absent.
    pub store_url: Option<String>,
    /// API key sent to the REST metadata store and object storage.
    pub store_api_key: Option<String>,
    /// Object storage bucket holding uploaded files.
    pub storage_bucket: String,
    /// Mail relay endpoint; without it every send fails and records stay pending.
    pub mail_api_url: Option<String>,
    /// Bearer key for the mail relay.
    pub mail_api_key: Option<String>,
    /// Sender address used for notification emails.
    pub mail_from: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Maximum words per summarization chunk.
    pub chunk_max_words: usize,
    /// Words shared by consecutive chunks.
    pub chunk_overlap_words: usize,
    /// Timeout applied to each OCR call.
    pub ocr_timeout: Duration,
    /// Timeout applied to each summarization call.
    pub summarizer_timeout: Duration,
    /// Timeout applied to store, storage and mail calls.
    pub http_timeout: Duration,
    /// Maximum number of documents processed concurrently.
    pub worker_concurrency: usize,
    /// Capacity of the processing queue.
    pub worker_queue_capacity: usize,
    /// Period of the notification dispatch loop.
    pub notify_interval: Duration,
    /// Period of the quick share dispatch loop.
    pub quick_share_interval: Duration,
    /// Period of the recovery sweep; `None` disables it.
    pub recovery_interval: Option<Duration>,
}

const DEFAULT_CHUNK_MAX_WORDS: usize = 700;
const DEFAULT_CHUNK_OVERLAP_WORDS: usize = 50;

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            ocr_url: load_env("OCR_URL")?,
            summarizer_url: load_env("SUMMARIZER_URL")?,
            summarizer_prompt: load_env_optional("SUMMARIZER_PROMPT"),
            store_url: load_env_optional("STORE_URL"),
            store_api_key: load_env_optional("STORE_API_KEY"),
            storage_bucket: load_env_optional("STORAGE_BUCKET")
                .unwrap_or_else(|| "documents".into()),
            mail_api_url: load_env_optional("MAIL_API_URL"),
            mail_api_key: load_env_optional("MAIL_API_KEY"),
            mail_from: load_env_optional("MAIL_FROM")
                .unwrap_or_else(|| "docpipe@localhost".into()),
            server_port: load_parsed("SERVER_PORT")?,
            chunk_max_words: load_parsed("CHUNK_MAX_WORDS")?.unwrap_or(DEFAULT_CHUNK_MAX_WORDS),
            chunk_overlap_words: load_parsed("CHUNK_OVERLAP_WORDS")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP_WORDS),
            ocr_timeout: load_secs("OCR_TIMEOUT_SECS", 60)?,
            summarizer_timeout: load_secs("SUMMARIZER_TIMEOUT_SECS", 60)?,
            http_timeout: load_secs("HTTP_TIMEOUT_SECS", 30)?,
            worker_concurrency: load_parsed("WORKER_CONCURRENCY")?.unwrap_or(4).max(1),
            worker_queue_capacity: load_parsed("WORKER_QUEUE_CAPACITY")?.unwrap_or(64).max(1),
            notify_interval: load_secs("NOTIFY_INTERVAL_SECS", 10)?,
            quick_share_interval: load_secs("QUICK_SHARE_INTERVAL_SECS", 10)?,
            recovery_interval: Some(load_secs("RECOVERY_INTERVAL_SECS", 0)?)
                .filter(|interval| !interval.is_zero()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_max_words == 0 || self.chunk_overlap_words >= self.chunk_max_words {
            return Err(ConfigError::InvalidChunkWindow {
                max_words: self.chunk_max_words,
                overlap: self.chunk_overlap_words,
            });
        }
        if self.notify_interval.is_zero() {
            return Err(ConfigError::InvalidValue("NOTIFY_INTERVAL_SECS".into()));
        }
        if self.quick_share_interval.is_zero() {
            return Err(ConfigError::InvalidValue("QUICK_SHARE_INTERVAL_SECS".into()));
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn load_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(load_parsed(key)?.unwrap_or(default)))
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        ocr_url = %config.ocr_url,
        summarizer_url = %config.summarizer_url,
        store = config.store_url.as_deref().unwrap_or("in-memory"),
        server_port = ?config.server_port,
        chunk_max_words = config.chunk_max_words,
        chunk_overlap_words = config.chunk_overlap_words,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        ocr_url: "http://127.0.0.1:8000/ocr".into(),
        summarizer_url: "http://127.0.0.1:9000/summarize".into(),
        summarizer_prompt: None,
        store_url: None,
        store_api_key: None,
        storage_bucket: "documents".into(),
        mail_api_url: None,
        mail_api_key: None,
        mail_from: "docpipe@localhost".into(),
        server_port: None,
        chunk_max_words: DEFAULT_CHUNK_MAX_WORDS,
        chunk_overlap_words: DEFAULT_CHUNK_OVERLAP_WORDS,
        ocr_timeout: Duration::from_secs(5),
        summarizer_timeout: Duration::from_secs(5),
        http_timeout: Duration::from_secs(5),
        worker_concurrency: 2,
        worker_queue_capacity: 8,
        notify_interval: Duration::from_millis(50),
        quick_share_interval: Duration::from_millis(50),
        recovery_interval: None,
    }
}
