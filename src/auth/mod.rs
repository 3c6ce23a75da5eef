//! Registry credentials for phase containers
//!
//! Resolves credentials per registry through a [`Keychain`] and serializes
//! them into the `CNB_REGISTRY_AUTH` JSON document the lifecycle reads.

mod docker_config;

pub use docker_config::DockerConfigKeychain;

use crate::error::PackResult;
use crate::reference::{normalize_registry, ImageReference};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Environment variable the lifecycle reads registry credentials from
pub const REGISTRY_AUTH_ENV: &str = "CNB_REGISTRY_AUTH";

/// Credential resolved for one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic { username: String, password: String },
    /// Pre-encoded `base64(user:password)` as stored in docker config files
    Encoded(String),
    Bearer(String),
}

impl Credential {
    /// Value of the HTTP `Authorization` header, `None` for anonymous access
    pub fn header(&self) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Basic { username, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            )),
            Self::Encoded(auth) => Some(format!("Basic {}", auth)),
            Self::Bearer(token) => Some(format!("Bearer {}", token)),
        }
    }
}

/// Resolves credentials for a registry host
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Resolve credentials for a normalized registry host (e.g. `index.docker.io`)
    async fn resolve(&self, registry: &str) -> PackResult<Credential>;
}

/// In-memory keychain, typically populated from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticKeychain {
    entries: HashMap<String, Credential>,
}

impl StaticKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential, folding Docker Hub aliases
    pub fn with(mut self, registry: &str, credential: Credential) -> Self {
        self.entries.insert(normalize_registry(registry), credential);
        self
    }

    /// Build from `registry -> "user:password"` pairs
    pub fn from_user_pass(pairs: &BTreeMap<String, String>) -> Self {
        pairs.iter().fold(Self::new(), |keychain, (registry, value)| {
            let credential = match value.split_once(':') {
                Some((username, password)) => Credential::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                },
                None => Credential::Bearer(value.clone()),
            };
            keychain.with(registry, credential)
        })
    }
}

#[async_trait]
impl Keychain for StaticKeychain {
    async fn resolve(&self, registry: &str) -> PackResult<Credential> {
        Ok(self
            .entries
            .get(&normalize_registry(registry))
            .cloned()
            .unwrap_or(Credential::Anonymous))
    }
}

/// Tries each keychain in order and returns the first non-anonymous credential
pub struct MultiKeychain {
    keychains: Vec<Box<dyn Keychain>>,
}

impl MultiKeychain {
    pub fn new(keychains: Vec<Box<dyn Keychain>>) -> Self {
        Self { keychains }
    }
}

#[async_trait]
impl Keychain for MultiKeychain {
    async fn resolve(&self, registry: &str) -> PackResult<Credential> {
        for keychain in &self.keychains {
            let credential = keychain.resolve(registry).await?;
            if credential != Credential::Anonymous {
                return Ok(credential);
            }
        }
        Ok(Credential::Anonymous)
    }
}

/// Build the `CNB_REGISTRY_AUTH` value for the registries of `images`.
///
/// Empty image names are skipped, as are registries resolving to anonymous
/// access. The result is a JSON object keyed by registry host.
pub async fn build_env_var(keychain: &dyn Keychain, images: &[&str]) -> PackResult<String> {
    let mut auths = BTreeMap::new();

    for image in images.iter().filter(|i| !i.is_empty()) {
        let reference = ImageReference::parse(image)?;
        let registry = reference.registry().to_string();
        if auths.contains_key(&registry) {
            continue;
        }

        match keychain.resolve(&registry).await?.header() {
            Some(header) => {
                debug!("Using credentials for registry {}", registry);
                auths.insert(registry, header);
            }
            None => debug!("Anonymous access for registry {}", registry),
        }
    }

    Ok(serde_json::to_string(&auths)?)
}
