use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::logging::LoggingConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "ap-southeast-1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Bucket that direct uploads are written to.
    pub bucket: String,
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
    /// Custom endpoint (LocalStack, MinIO). Requests switch to path-style.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_upload_prefix() -> String {
    "uploads/".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub index_id: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_language_code() -> String {
    "en".to_string()
}
fn default_page_size() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            max_tokens: default_max_tokens(),
            anthropic_version: default_anthropic_version(),
            region: None,
            endpoint_url: None,
        }
    }
}

fn default_model_id() -> String {
    "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_anthropic_version() -> String {
    "bedrock-2023-05-31".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_session")]
    pub default_session: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            history_limit: default_history_limit(),
            default_session: default_session(),
            region: None,
            endpoint_url: None,
        }
    }
}

fn default_table() -> String {
    "ChatbotMemory".to_string()
}
fn default_history_limit() -> usize {
    3
}
fn default_session() -> String {
    "default_session".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AssistantConfig {
    /// Also accept `{"arguments": {"question": ...}}` events.
    #[serde(default)]
    pub accept_arguments_shape: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Target chat. Falls back to `TELEGRAM_CHAT_ID` when unset.
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chat_id: None,
            api_base: default_api_base(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// A config with every default applied, for in-memory runs and tests.
    pub fn minimal() -> Self {
        Self {
            aws: AwsConfig::default(),
            storage: StorageConfig {
                bucket: "kb-documents".to_string(),
                upload_prefix: default_upload_prefix(),
                endpoint_url: None,
            },
            index: IndexConfig {
                index_id: "local-index".to_string(),
                language_code: default_language_code(),
                page_size: default_page_size(),
                region: None,
                endpoint_url: None,
            },
            model: ModelConfig::default(),
            memory: MemoryConfig::default(),
            assistant: AssistantConfig::default(),
            relay: RelayConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.aws.region.trim().is_empty() {
            anyhow::bail!("aws.region must not be empty");
        }
        if self.storage.bucket.trim().is_empty() {
            anyhow::bail!("storage.bucket must not be empty");
        }
        if self.index.index_id.trim().is_empty() {
            anyhow::bail!("index.index_id must not be empty");
        }
        if self.index.page_size < 1 {
            anyhow::bail!("index.page_size must be >= 1");
        }
        if self.model.max_tokens == 0 {
            anyhow::bail!("model.max_tokens must be > 0");
        }
        if self.memory.table.trim().is_empty() {
            anyhow::bail!("memory.table must not be empty");
        }
        if self.memory.history_limit == 0 {
            anyhow::bail!("memory.history_limit must be >= 1");
        }
        if self.memory.default_session.is_empty() {
            anyhow::bail!("memory.default_session must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
///
/// A file that exists and fails to parse or validate is still an error.
pub fn load_config_or_minimal(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::minimal());
    }
    load_config(path)
}
