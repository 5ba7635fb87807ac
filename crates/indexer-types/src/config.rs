//! Configuration loading for the aggregate indexer.
//!
//! Layered config: defaults -> default config file -> explicit config file ->
//! `INDEXER__*` environment variables. The default file lives at
//! `~/.config/aggregate-indexer/config.{toml,json,yaml}` (platform specific).

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TypesError;

/// Which implementation backs the lock service or the aggregator cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process, single node
    #[default]
    Local,
    /// Shared key-value service, safe across processes
    #[serde(alias = "redis")]
    Distributed,
}

/// Document store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Base URL of the document store
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Per-request timeout (ms)
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

fn default_store_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_store_timeout() -> u64 {
    30_000
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            timeout_ms: default_store_timeout(),
        }
    }
}

/// Lock service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default)]
    pub backend: BackendKind,

    /// Lease of a distributed lock (ms)
    #[serde(default = "default_lock_timeout")]
    pub timeout_ms: u64,

    /// Acquisition attempts after the first one
    #[serde(default = "default_lock_retries")]
    pub retries: u32,

    /// Pause between acquisition attempts (ms)
    #[serde(default = "default_lock_delay")]
    pub delay_ms: u64,
}

fn default_lock_timeout() -> u64 {
    20_000
}

fn default_lock_retries() -> u32 {
    3
}

fn default_lock_delay() -> u64 {
    100
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            timeout_ms: default_lock_timeout(),
            retries: default_lock_retries(),
            delay_ms: default_lock_delay(),
        }
    }
}

/// Aggregator cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: BackendKind,

    /// Delay between a write to an idle cache and the next flush (ms)
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,

    /// Keys replayed concurrently during a flush
    #[serde(default = "default_flush_concurrency")]
    pub flush_concurrency: usize,

    /// Namespace prefix for distributed cache keys
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_flush_timeout() -> u64 {
    10_000
}

fn default_flush_concurrency() -> usize {
    1
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            flush_timeout_ms: default_flush_timeout(),
            flush_concurrency: default_flush_concurrency(),
            key_prefix: None,
        }
    }
}

impl CacheSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.flush_timeout_ms == 0 {
            return Err("flush_timeout_ms must be > 0".to_string());
        }
        if self.flush_concurrency == 0 {
            return Err("flush_concurrency must be > 0".to_string());
        }
        Ok(())
    }
}

/// Main indexer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Instance name; namespaces store indices and cache keys
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub locks: LockSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            log_level: default_log_level(),
            store: StoreSettings::default(),
            locks: LockSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Default config file
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (`INDEXER__CACHE__FLUSH_TIMEOUT_MS`, ...)
    pub fn load(config_path: Option<&str>) -> Result<Self, TypesError> {
        let default_config_path = ProjectDirs::from("", "", "aggregate-indexer")
            .map(|p| p.config_dir().join("config"))
            .unwrap_or_else(|| PathBuf::from("./config"));

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("instance_name", default_instance_name())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| TypesError::Config(e.to_string()))?
            // 2. Default config file
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. Explicit config file
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.instance_name.trim().is_empty() {
            return Err(TypesError::Config("instance_name must not be empty".to_string()));
        }
        self.cache.validate().map_err(TypesError::Config)
    }

    /// Namespace of distributed cache keys: `[{prefix}/]{instance}:agg:`.
    ///
    /// An explicit `cache.key_prefix` wins over the `REDIS_KEY_PREFIX`
    /// environment variable.
    pub fn cache_namespace(&self) -> String {
        let prefix = self
            .cache
            .key_prefix
            .clone()
            .or_else(|| std::env::var("REDIS_KEY_PREFIX").ok())
            .filter(|p| !p.is_empty());
        match prefix {
            Some(prefix) => format!("{}/{}:agg:", prefix, self.instance_name),
            None => format!("{}:agg:", self.instance_name),
        }
    }
}
