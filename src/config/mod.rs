//! Configuration management for pack-exec

pub mod schema;

pub use schema::Config;

use crate::build::api::ApiVersion;
use crate::build::options::ProxySettings;
use crate::error::{PackError, PackResult};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pack-exec")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load(&self) -> PackResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> PackResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PackError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| PackError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config
            .lifecycle
            .creator_min_platform_api
            .parse::<ApiVersion>()
            .map_err(|e| PackError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: format!("lifecycle.creator_min_platform_api: {}", e),
            })?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> PackResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            PackError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> PackResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PackError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Proxies from the config file, falling back to the process environment
    pub fn proxy_settings(&self) -> ProxySettings {
        let pick = |configured: &Option<String>, key: &str| {
            configured
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env::var(key).ok())
                .or_else(|| env::var(key.to_lowercase()).ok())
                .filter(|v| !v.is_empty())
        };

        ProxySettings {
            http_proxy: pick(&self.network.http_proxy, "HTTP_PROXY"),
            https_proxy: pick(&self.network.https_proxy, "HTTPS_PROXY"),
            no_proxy: pick(&self.network.no_proxy, "NO_PROXY"),
        }
    }

    /// Creator floor; an unparsable value was rejected at load time
    pub fn creator_min_api(&self) -> PackResult<ApiVersion> {
        self.lifecycle.creator_min_platform_api.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.creator_min_api().unwrap(), ApiVersion::new(0, 4));
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.lifecycle.trust_builder = true;
        config.docker.host = Some("inherit".to_string());

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert!(loaded.lifecycle.trust_builder);
        assert_eq!(loaded.docker.host.as_deref(), Some("inherit"));
    }

    #[tokio::test]
    async fn invalid_creator_api_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[lifecycle]\ncreator_min_platform_api = \"four\"\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, PackError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn malformed_toml_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[general\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, PackError::ConfigInvalid { .. }));
    }

    #[test]
    #[serial]
    fn proxy_prefers_config_over_environment() {
        env::set_var("HTTP_PROXY", "http://env:3128");
        env::set_var("NO_PROXY", "env.local");

        let mut config = Config::default();
        config.network.http_proxy = Some("http://config:3128".to_string());
        let proxy = config.proxy_settings();

        env::remove_var("HTTP_PROXY");
        env::remove_var("NO_PROXY");

        assert_eq!(proxy.http_proxy.as_deref(), Some("http://config:3128"));
        assert_eq!(proxy.no_proxy.as_deref(), Some("env.local"));
    }
}
