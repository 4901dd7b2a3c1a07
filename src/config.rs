//! Configuration loader and validator for the backup/sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub chunking: Chunking,
    pub monitor: Monitor,
    pub broker: Broker,
    pub providers: Providers,
    pub storage: Storage,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
    /// Base URL used when constructing OAuth redirect URIs.
    pub base_url: String,
    pub sync_poll_interval_ms: u64,
}

/// Chunked upload tuning. The reference behavior uses 512 KiB chunks and
/// three workers; both are configuration, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunking {
    pub chunk_size_bytes: usize,
    pub upload_workers: usize,
    /// Number of recent chunk timings used for speed/ETA.
    pub progress_window: usize,
}

/// Persistent job monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    pub poll_interval_ms: u64,
    pub stall_threshold_secs: u64,
    /// Jobs with activity inside this window are re-attached after a reload.
    pub resume_window_secs: u64,
}

/// OAuth completion polling tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Broker {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

/// Per-provider OAuth applications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Providers {
    pub google_drive: ProviderApp,
    pub dropbox: ProviderApp,
}

/// OAuth client credentials for one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_path: String,
}

/// Storage bucket settings for restored media and export artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Storage {
    pub bucket: String,
    pub export_dir: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and
    /// `storage.export_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if !self.storage.export_dir.trim().is_empty() {
            fs::create_dir_all(&self.storage.export_dir)?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.base_url must be non-empty"));
    }
    if cfg.app.sync_poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.sync_poll_interval_ms must be > 0"));
    }

    if cfg.chunking.chunk_size_bytes == 0 {
        return Err(ConfigError::Invalid("chunking.chunk_size_bytes must be > 0"));
    }
    if cfg.chunking.upload_workers == 0 {
        return Err(ConfigError::Invalid("chunking.upload_workers must be > 0"));
    }
    if cfg.chunking.progress_window == 0 {
        return Err(ConfigError::Invalid("chunking.progress_window must be > 0"));
    }

    if cfg.monitor.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("monitor.poll_interval_ms must be > 0"));
    }
    if cfg.monitor.stall_threshold_secs == 0 {
        return Err(ConfigError::Invalid("monitor.stall_threshold_secs must be > 0"));
    }
    if cfg.monitor.resume_window_secs == 0 {
        return Err(ConfigError::Invalid("monitor.resume_window_secs must be > 0"));
    }

    if cfg.broker.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("broker.poll_interval_ms must be > 0"));
    }
    if cfg.broker.max_poll_attempts == 0 {
        return Err(ConfigError::Invalid("broker.max_poll_attempts must be > 0"));
    }

    if cfg.providers.google_drive.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.google_drive.client_id must be non-empty"));
    }
    if cfg.providers.google_drive.redirect_path.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.google_drive.redirect_path must be non-empty"));
    }
    if cfg.providers.dropbox.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.dropbox.client_id must be non-empty"));
    }
    if cfg.providers.dropbox.redirect_path.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.dropbox.redirect_path must be non-empty"));
    }

    if cfg.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.bucket must be non-empty"));
    }
    if cfg.storage.export_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.export_dir must be non-empty"));
    }

    Ok(())
}

/// Example configuration with the reference defaults.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  base_url: "https://tours.example.com"
  sync_poll_interval_ms: 1000

chunking:
  chunk_size_bytes: 524288
  upload_workers: 3
  progress_window: 5

monitor:
  poll_interval_ms: 3000
  stall_threshold_secs: 300
  resume_window_secs: 1800

broker:
  poll_interval_ms: 2000
  max_poll_attempts: 60

providers:
  google_drive:
    client_id: "YOUR_GOOGLE_CLIENT_ID"
    client_secret: "YOUR_GOOGLE_CLIENT_SECRET"
    redirect_path: "/oauth/google-drive/callback"
  dropbox:
    client_id: "YOUR_DROPBOX_APP_KEY"
    client_secret: "YOUR_DROPBOX_APP_SECRET"
    redirect_path: "/oauth/dropbox/callback"

storage:
  bucket: "tour-backups"
  export_dir: "./data/exports"
"#
}
