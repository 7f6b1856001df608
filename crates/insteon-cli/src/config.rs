//! Configuration loading

use anyhow::{Context, Result};
use insteon_hub::{HubAddress, HubSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub IP address or host name
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Credentials printed on the bottom of the hub
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_host() -> String {
    "192.168.1.100".to_string()
}

fn default_port() -> u16 {
    insteon_hub::transport::DEFAULT_PORT
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between buffer reads in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Buffer reads before a command is reported unconfirmed
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    /// Buffer reads before a status query gives up
    #[serde(default = "default_status_attempts")]
    pub status_attempts: u32,
    /// Re-send a command every N reads (0 never re-sends)
    #[serde(default = "default_redispatch_every")]
    pub redispatch_every: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            verify_attempts: default_verify_attempts(),
            status_attempts: default_status_attempts(),
            redispatch_every: default_redispatch_every(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_verify_attempts() -> u32 {
    3
}

fn default_status_attempts() -> u32 {
    9
}

fn default_redispatch_every() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for per-device state files and the refresh lock
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Seconds a status response stays fresh
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Seconds after which a refresh lock is considered abandoned
    #[serde(default = "default_lock_stale")]
    pub lock_stale_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            ttl_secs: default_ttl(),
            lock_stale_secs: default_lock_stale(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("insteon-hub")
}

fn default_ttl() -> u64 {
    20
}

fn default_lock_stale() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Device catalog JSON; the built-in table is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn hub_address(&self) -> HubAddress {
        let mut address = HubAddress::new(&self.hub.host, &self.hub.username, &self.hub.password);
        address.port = self.hub.port;
        address.timeout = Duration::from_secs(self.hub.timeout_secs);
        address
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            poll_interval: Duration::from_millis(self.poll.interval_ms),
            verify_attempts: self.poll.verify_attempts,
            status_attempts: self.poll.status_attempts,
            redispatch_every: self.poll.redispatch_every,
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save an example configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut config = Config::default();
    config.hub.username = "Username".to_string();
    config.hub.password = "Password".to_string();

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[hub]
host = "10.0.0.5"
username = "admin"
password = "secret"

[poll]
interval_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(config.hub.port, 25105);
        assert_eq!(config.hub.timeout_secs, 10);
        assert_eq!(config.poll.verify_attempts, 3);
        assert_eq!(config.cache.ttl_secs, 20);
        assert!(config.catalog.path.is_none());

        let settings = config.hub_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.status_attempts, 9);
        assert_eq!(config.hub_address().base_url(), "http://10.0.0.5:25105");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&dir.path().join("insteon.toml")).unwrap();
        assert_eq!(config.poll.interval_ms, 1000);
    }

    #[test]
    fn test_saved_default_loads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("insteon.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.hub.username, "Username");
        assert_eq!(config.cache.lock_stale_secs, 60);
    }
}
