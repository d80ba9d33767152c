//! Application configuration for Curio.
//!
//! User config lives at `~/.curio/curio.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CurioError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "curio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".curio";

// ---------------------------------------------------------------------------
// Config structs (matching curio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry and rate-limit policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Public collection API settings.
    #[serde(default)]
    pub collection_api: CollectionApiConfig,

    /// Embedding service settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search index settings.
    #[serde(default)]
    pub index: IndexConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for datasets, caches, checkpoints, and sinks.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Delay between items in milliseconds (0 permitted).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Persist the checkpoint every N items.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            delay_ms: default_delay_ms(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

fn default_data_dir() -> String {
    "~/curio-data".into()
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_checkpoint_interval() -> usize {
    16
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per item before recording a failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in seconds (doubled each attempt).
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Cap on the escalating soft-block penalty, in seconds.
    #[serde(default = "default_rate_limit_cap_secs")]
    pub rate_limit_cap_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            rate_limit_cap_secs: default_rate_limit_cap_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_secs() -> f64 {
    2.0
}
fn default_rate_limit_cap_secs() -> u64 {
    300
}

/// `[collection_api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionApiConfig {
    /// Base URL of the public collection API.
    #[serde(default = "default_collection_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CollectionApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_collection_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_collection_base_url() -> String {
    "https://collectionapi.metmuseum.org/public/collection/v1".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding service endpoint (POST, JSON).
    #[serde(default)]
    pub endpoint: String,

    /// Producing-model tag written to output records (e.g., `jina_v3`).
    #[serde(default = "default_model_key")]
    pub model: String,

    /// Execution device/tier hint passed opaquely to the service.
    #[serde(default = "default_device")]
    pub device: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: default_model_key(),
            device: default_device(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_model_key() -> String {
    "jina_v3".into()
}
fn default_device() -> String {
    "cuda".into()
}
fn default_embed_timeout_secs() -> u64 {
    120
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Document store URL.
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Index name for artwork documents.
    #[serde(default = "default_index_name")]
    pub name: String,

    /// Bulk upsert batch size.
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            name: default_index_name(),
            batch_size: default_index_batch_size(),
            api_key_env: default_index_api_key_env(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:9200".into()
}
fn default_index_name() -> String {
    "artworks_semantic".into()
}
fn default_index_batch_size() -> usize {
    100
}
fn default_index_api_key_env() -> String {
    "ELASTICSEARCH_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Cap on the number of items processed this run.
    pub limit: Option<usize>,
    /// Reuse the existing checkpoint (append sink) vs. start fresh
    /// (truncate sink, zero checkpoint).
    pub resume: bool,
    /// Delay between items.
    pub delay: Duration,
    /// Persist the checkpoint every N items.
    pub checkpoint_interval: usize,
    /// Whether terminal not-found outcomes are written to the dedup
    /// cache so future runs skip them without a network round-trip.
    pub cache_not_found: bool,
    /// Execution device/tier hint, passed opaquely to the service.
    pub device: String,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            limit: None,
            resume: true,
            delay: Duration::from_millis(config.defaults.delay_ms),
            checkpoint_interval: config.defaults.checkpoint_interval,
            cache_not_found: false,
            device: config.embedding.device.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.curio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CurioError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.curio/curio.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CurioError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CurioError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CurioError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CurioError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CurioError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
