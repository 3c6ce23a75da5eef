//! Keychain backed by the docker CLI configuration file

use super::{Credential, Keychain};
use crate::error::{PackError, PackResult};
use crate::reference::normalize_registry;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
    identitytoken: Option<String>,
    registrytoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Reads `~/.docker/config.json` (or `$DOCKER_CONFIG/config.json`)
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    /// Keychain at the default docker config location
    pub fn new() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
            .unwrap_or_else(|| PathBuf::from(".docker"));
        Self::with_path(dir.join("config.json"))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> PackResult<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| PackError::io(format!("reading {}", self.path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Ask `docker-credential-<helper>` for the registry's credentials
    async fn from_helper(helper: &str, registry: &str) -> PackResult<Credential> {
        let program = format!("docker-credential-{}", helper);
        debug!("Executing: {} get ({})", program, registry);

        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PackError::command_failed(&program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(server_url(registry).as_bytes())
                .await
                .map_err(|e| PackError::io(format!("writing to {}", program), e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PackError::command_failed(&program, e))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("credentials not found") {
                return Ok(Credential::Anonymous);
            }
            return Err(PackError::Auth {
                registry: registry.to_string(),
                reason: format!(
                    "{} get failed: {}",
                    program,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let response: HelperResponse = serde_json::from_slice(&output.stdout)?;
        if response.username == "<token>" {
            Ok(Credential::Bearer(response.secret))
        } else {
            Ok(Credential::Basic {
                username: response.username,
                password: response.secret,
            })
        }
    }
}

impl Default for DockerConfigKeychain {
    fn default() -> Self {
        Self::new()
    }
}

/// Docker Hub credentials are stored under the legacy v1 URL
fn server_url(registry: &str) -> String {
    if registry == crate::reference::DEFAULT_REGISTRY {
        "https://index.docker.io/v1/".to_string()
    } else {
        registry.to_string()
    }
}

fn entry_credential(entry: &AuthEntry) -> Credential {
    if let Some(token) = entry.registrytoken.as_ref().or(entry.identitytoken.as_ref()) {
        return Credential::Bearer(token.clone());
    }
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        };
    }
    match entry.auth {
        Some(ref auth) if !auth.is_empty() => Credential::Encoded(auth.clone()),
        _ => Credential::Anonymous,
    }
}

#[async_trait]
impl Keychain for DockerConfigKeychain {
    async fn resolve(&self, registry: &str) -> PackResult<Credential> {
        let config = self.load().await?;
        let registry = normalize_registry(registry);

        let helper = config
            .cred_helpers
            .iter()
            .find(|(host, _)| normalize_registry(host) == registry)
            .map(|(_, helper)| helper.clone());
        if let Some(helper) = helper {
            return Self::from_helper(&helper, &registry).await;
        }

        if let Some(entry) = config
            .auths
            .iter()
            .find(|(host, _)| normalize_registry(host) == registry)
            .map(|(_, entry)| entry)
        {
            let credential = entry_credential(entry);
            if credential != Credential::Anonymous {
                return Ok(credential);
            }
        }

        match config.creds_store {
            Some(ref store) if !store.is_empty() => Self::from_helper(store, &registry).await,
            _ => Ok(Credential::Anonymous),
        }
    }
}
