//! Docker shared types
//!
//! Request and response records exchanged with a [`DockerClient`](super::DockerClient).

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Byte stream carrying a tar archive
pub type TarStream = Pin<Box<dyn AsyncRead + Send>>;

/// Container-level settings for a new container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Image to create the container from
    pub image: String,
    /// Command; the first element is the executable
    pub cmd: Vec<String>,
    /// Entrypoint override. `Some(vec![])` clears the image entrypoint
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=value` pairs in application order
    pub env: Vec<String>,
    /// User to run as; empty keeps the image default
    pub user: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerConfig {
    /// Value of an environment variable, last assignment wins
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Isolation technology for Windows containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Isolation {
    #[default]
    Default,
    Process,
    HyperV,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Process => write!(f, "process"),
            Self::HyperV => write!(f, "hyperv"),
        }
    }
}

/// Host-level settings for a new container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    /// `source:target[:ro]` bind and volume specs
    pub binds: Vec<String>,
    /// Network mode; empty uses the daemon default
    pub network_mode: String,
    pub isolation: Isolation,
    /// Security options (e.g., "no-new-privileges=true")
    pub security_opt: Vec<String>,
    /// User namespace mode (e.g., "host")
    pub userns_mode: String,
}

/// Stdout and stderr of an attached container
pub struct AttachedStreams {
    pub stdout: Pin<Box<dyn AsyncRead + Send>>,
    pub stderr: Pin<Box<dyn AsyncRead + Send>>,
}

/// Container state as reported by inspect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "Id")]
    pub id: String,
    /// Image ID the container was created from
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "State")]
    pub state: ContainerState,
    #[serde(rename = "Mounts", default, deserialize_with = "null_as_default")]
    pub mounts: Vec<MountPoint>,
}

/// Volume or bind mounted into a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MountPoint {
    /// Volume name; empty for bind mounts
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    /// "created", "running", "exited", ...
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Running", default)]
    pub running: bool,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

/// Image metadata as reported by inspect
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "Id")]
    pub id: String,
    /// "linux" or "windows"
    #[serde(rename = "Os", default)]
    pub os: String,
    #[serde(rename = "Architecture", default)]
    pub architecture: String,
    #[serde(rename = "Config", default)]
    pub config: ImageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "User", default)]
    pub user: String,
    #[serde(rename = "Env", default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
}

impl ImageInfo {
    /// Value of an image environment variable
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.config
            .env
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.get(key).map(String::as_str)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
