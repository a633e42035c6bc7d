//! Configuration management for Postflow
//!
//! Configuration is read from a TOML file located via `POSTFLOW_CONFIG` or
//! `~/.config/postflow/config.toml`. A few values can be overridden from the
//! environment so secrets do not have to live in the file:
//!
//! - `POSTFLOW_SECRET_KEY` - token encryption key (32 raw bytes or base64)
//! - `POSTFLOW_DB_PATH` - database file
//!
//! ```toml
//! [database]
//! path = "~/.local/share/postflow/postflow.db"
//!
//! [security]
//! secret_key = "base64-of-32-bytes"
//!
//! [worker]
//! publish_concurrency = 10
//!
//! [refresh]
//! interval_secs = 600
//! window_secs = 1800
//!
//! [tiktok]
//! client_id = "client-key"
//! client_secret = "client-secret"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::TokenCipher;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub instagram: Option<OAuthAppConfig>,
    pub tiktok: Option<OAuthAppConfig>,
    pub youtube: Option<OAuthAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum accounts published concurrently for one post
    pub publish_concurrency: usize,
    /// Seconds between queue polls in the daemon
    pub poll_interval_secs: u64,
    /// Maximum tasks claimed per poll
    pub batch_size: u32,
    /// Seconds a claimed task stays invisible before redelivery
    pub lease_secs: u64,
    /// Deliveries before a task is buried
    pub max_attempts: u32,
    /// Base delay for exponential redelivery backoff
    pub retry_base_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            publish_concurrency: 10,
            poll_interval_secs: 5,
            batch_size: 10,
            lease_secs: 900,
            max_attempts: 5,
            retry_base_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    /// Tokens expiring within this many seconds are refreshed
    pub window_secs: u64,
    pub concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            window_secs: 1800,
            concurrency: 10,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// OAuth application credentials for one platform
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Override the API base URL (used against local test servers)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for OAuthAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthAppConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied after parsing.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/postflow/postflow.db".to_string(),
            },
            security: SecurityConfig::default(),
            worker: WorkerConfig::default(),
            refresh: RefreshConfig::default(),
            http: HttpConfig::default(),
            instagram: None,
            tiktok: None,
            youtube: None,
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("POSTFLOW_SECRET_KEY") {
            if !key.is_empty() {
                self.security.secret_key = Some(key);
            }
        }

        if let Ok(path) = std::env::var("POSTFLOW_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.publish_concurrency == 0 {
            return Err(invalid("worker.publish_concurrency", "must be at least 1"));
        }
        if self.refresh.concurrency == 0 {
            return Err(invalid("refresh.concurrency", "must be at least 1"));
        }
        if self.refresh.interval_secs == 0 {
            return Err(invalid("refresh.interval_secs", "must be at least 1"));
        }
        if self.worker.max_attempts == 0 {
            return Err(invalid("worker.max_attempts", "must be at least 1"));
        }
        if self.worker.poll_interval_secs == 0 {
            return Err(invalid("worker.poll_interval_secs", "must be at least 1"));
        }
        if self.worker.batch_size == 0 {
            return Err(invalid("worker.batch_size", "must be at least 1"));
        }
        if self.worker.lease_secs == 0 {
            return Err(invalid("worker.lease_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Build the token cipher from the configured key
    pub fn token_cipher(&self) -> Result<TokenCipher> {
        let key = self
            .security
            .secret_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("security.secret_key".to_string()))?;
        TokenCipher::from_key_material(key)
    }

    /// Build the shared HTTP client handed to platform adapters
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout_secs))
            .build()
            .map_err(|e| invalid("http", &e.to_string()))
    }

    /// Platforms with app credentials configured
    pub fn registered_platforms(&self) -> Vec<&'static str> {
        let mut platforms = Vec::new();
        if self.instagram.is_some() {
            platforms.push("instagram");
        }
        if self.tiktok.is_some() {
            platforms.push("tiktok");
        }
        if self.youtube.is_some() {
            platforms.push("youtube");
        }
        platforms
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::PostflowError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTFLOW_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postflow").join("config.toml"))
}
