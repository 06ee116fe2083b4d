//! Application configuration for siteharvest.
//!
//! User config lives at `~/.siteharvest/siteharvest.toml`. Environment
//! variables (`SITEHARVEST_*`) override config file values, which override
//! defaults; CLI flags override everything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "siteharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".siteharvest";

// ---------------------------------------------------------------------------
// Config structs (matching siteharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote crawl backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Embedding backend settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl: CrawlPolicyConfig,
}

/// `[backend]` section — the externally-hosted crawling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base address of the crawl backend.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Name of the env var holding the backend credential (never the key itself).
    #[serde(default = "default_backend_key_env")]
    pub api_key_env: String,

    /// Timeout for `/crawl` calls; long, to accommodate heavy pages.
    #[serde(default = "default_crawl_timeout_secs")]
    pub crawl_timeout_secs: u64,

    /// Timeout for `/task/{id}` and `/health` calls; short.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Bounded attempt count for asynchronous task polling.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Fixed wait between poll attempts, in ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key_env: default_backend_key_env(),
            crawl_timeout_secs: default_crawl_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:11235".into()
}
fn default_backend_key_env() -> String {
    "SITEHARVEST_BACKEND_KEY".into()
}
fn default_crawl_timeout_secs() -> u64 {
    300
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_poll_max_attempts() -> u32 {
    30
}
fn default_poll_interval_ms() -> u64 {
    2000
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding endpoint address; empty disables embedding.
    #[serde(default)]
    pub endpoint: String,

    /// Name of the env var holding the embedding credential.
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: default_embedding_key_env(),
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_key_env() -> String {
    "SITEHARVEST_EMBEDDING_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPolicyConfig {
    /// Maximum traversal depth requested from the backend's deep crawl.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum pages attempted per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Traversal strategy tag: "auto", "native", or "manual".
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Addresses crawled together before a cool-off pause.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches, in ms; also the linear back-off unit.
    #[serde(default = "default_cool_off_ms")]
    pub cool_off_ms: u64,

    /// Total attempts per batch before its addresses are recorded as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// In-flight request cap within one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for CrawlPolicyConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            strategy: default_strategy(),
            batch_size: default_batch_size(),
            cool_off_ms: default_cool_off_ms(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_depth() -> u32 {
    2
}
fn default_max_pages() -> usize {
    50
}
fn default_strategy() -> String {
    "auto".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_cool_off_ms() -> u64 {
    3000
}
fn default_max_retries() -> u32 {
    3
}
fn default_concurrency() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Crawler config (runtime, merged from config + env + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum traversal depth for native deep crawl.
    pub max_depth: u32,
    /// Maximum pages attempted per run.
    pub max_pages: usize,
    /// Traversal strategy tag: "auto", "native", or "manual".
    pub strategy: String,
    /// Batch size for the scheduler.
    pub batch_size: usize,
    /// Cool-off delay between batches.
    pub cool_off: Duration,
    /// Total attempts per batch.
    pub max_retries: u32,
    /// In-batch concurrency cap.
    pub concurrency: usize,
}

impl From<&AppConfig> for CrawlerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_depth: config.crawl.max_depth,
            max_pages: config.crawl.max_pages,
            strategy: config.crawl.strategy.clone(),
            batch_size: config.crawl.batch_size,
            cool_off: Duration::from_millis(config.crawl.cool_off_ms),
            max_retries: config.crawl.max_retries,
            concurrency: config.crawl.concurrency,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.siteharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.siteharvest/siteharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply env overrides.
/// Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load the application config from a specific file path (no env overrides).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `SITEHARVEST_*` environment overrides on top of file values.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("SITEHARVEST_BACKEND_URL") {
        config.backend.base_url = v;
    }
    if let Ok(v) = std::env::var("SITEHARVEST_EMBEDDING_ENDPOINT") {
        config.embedding.endpoint = v;
    }
    if let Ok(v) = std::env::var("SITEHARVEST_STRATEGY") {
        config.crawl.strategy = v;
    }
    if let Ok(v) = parse_env("SITEHARVEST_MAX_DEPTH") {
        config.crawl.max_depth = v;
    }
    if let Ok(v) = parse_env("SITEHARVEST_MAX_PAGES") {
        config.crawl.max_pages = v;
    }
    if let Ok(v) = parse_env("SITEHARVEST_BATCH_SIZE") {
        config.crawl.batch_size = v;
    }
    if let Ok(v) = parse_env("SITEHARVEST_COOL_OFF_MS") {
        config.crawl.cool_off_ms = v;
    }
    if let Ok(v) = parse_env("SITEHARVEST_MAX_RETRIES") {
        config.crawl.max_retries = v;
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> std::result::Result<T, ()> {
    std::env::var(name)
        .map_err(|_| ())
        .and_then(|v| v.parse().map_err(|_| ()))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the credential named by `env_name`, if set and non-empty.
pub fn credential(env_name: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("SITEHARVEST_BACKEND_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.batch_size, 10);
        assert_eq!(parsed.backend.api_key_env, "SITEHARVEST_BACKEND_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[backend]
base_url = "https://crawl.internal:8000"

[crawl]
batch_size = 5
max_pages = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.backend.base_url, "https://crawl.internal:8000");
        assert_eq!(config.crawl.batch_size, 5);
        assert_eq!(config.crawl.max_pages, 10);
        // Untouched sections keep defaults
        assert_eq!(config.crawl.max_retries, 3);
        assert_eq!(config.backend.poll_max_attempts, 30);
    }

    #[test]
    fn crawler_config_from_app_config() {
        let app = AppConfig::default();
        let crawler = CrawlerConfig::from(&app);
        assert_eq!(crawler.batch_size, 10);
        assert_eq!(crawler.max_pages, 50);
        assert_eq!(crawler.cool_off, Duration::from_millis(3000));
        assert_eq!(crawler.concurrency, 3);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = AppConfig::default();
        // Unique var names would race with parallel tests; set and unset inline.
        unsafe {
            std::env::set_var("SITEHARVEST_BATCH_SIZE", "7");
            std::env::set_var("SITEHARVEST_STRATEGY", "manual");
        }
        apply_env_overrides(&mut config);
        unsafe {
            std::env::remove_var("SITEHARVEST_BATCH_SIZE");
            std::env::remove_var("SITEHARVEST_STRATEGY");
        }
        assert_eq!(config.crawl.batch_size, 7);
        assert_eq!(config.crawl.strategy, "manual");
    }

    #[test]
    fn missing_credential_is_none() {
        assert!(credential("SITEHARVEST_TEST_NONEXISTENT_KEY_98765").is_none());
    }
}
