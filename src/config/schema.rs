//! Configuration schema for pack-exec
//!
//! Configuration is stored at `~/.config/pack-exec/config.toml`

use crate::build::options::DEFAULT_LIFECYCLE_IMAGE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Lifecycle selection
    pub lifecycle: LifecycleConfig,

    /// Container runtime settings
    pub docker: DockerConfig,

    /// Network and proxy settings passed to phase containers
    pub network: NetworkConfig,

    /// Registry credentials
    pub registry: RegistryConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Pass `-log-level debug` to every phase
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Image holding the lifecycle binaries for analyze, restore and export
    pub image: String,

    /// Lowest platform API that runs the single creator phase
    pub creator_min_platform_api: String,

    /// Trust builders by default, allowing the creator when publishing
    pub trust_builder: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_LIFECYCLE_IMAGE.to_string(),
            creator_min_platform_api: "0.4".to_string(),
            trust_builder: false,
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Runtime binary to invoke
    pub binary: String,

    /// Daemon host mounted into phases; `inherit` reads `DOCKER_HOST`
    pub host: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network mode for phase containers; empty uses the runtime default
    pub mode: String,

    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Static credentials as `registry = "user:password"`
    pub auth: BTreeMap<String, String>,
}
