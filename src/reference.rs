//! Image reference parsing
//!
//! Parses references like `registry.example.com/team/app:1.0` into structured
//! components and normalizes Docker Hub shorthand so that `my/repo`,
//! `docker.io/my/repo:latest` and `index.docker.io/my/repo` compare equal.

use crate::error::{PackError, PackResult};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Canonical Docker Hub registry name.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Default tag when neither tag nor digest is given.
pub const DEFAULT_TAG: &str = "latest";

const DOCKER_HUB_ALIASES: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Parsed image reference.
#[derive(Debug, Clone)]
pub struct ImageReference {
    original: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` -> index.docker.io/library/nginx:latest
    /// - `myuser/myimage:1.0` -> index.docker.io/myuser/myimage:1.0
    /// - `localhost:5000/app` -> localhost:5000/app:latest
    /// - `ghcr.io/org/image@sha256:abc...`
    pub fn parse(reference: &str) -> PackResult<Self> {
        let original = reference.trim();
        if original.is_empty() {
            return Err(PackError::invalid_reference(reference, "empty reference"));
        }

        let (name_tag, digest) = match original.rsplit_once('@') {
            Some((name, digest)) => {
                validate_digest(original, digest)?;
                (name, Some(digest.to_string()))
            }
            None => (original, None),
        };

        // A colon after the last slash separates the tag; earlier colons are ports
        let last_slash = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref tag) = tag {
            validate_tag(original, tag)?;
        }

        let (registry, repository) = split_registry_repository(original, name)?;

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            original: original.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host, with Docker Hub aliases folded into `index.docker.io`
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path without registry, e.g. `library/nginx`
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Tag or digest identifying the image within its repository
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// `registry/repository` without tag or digest
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Fully qualified, normalized reference
    pub fn name(&self) -> String {
        match self.digest {
            Some(ref digest) => format!("{}@{}", self.context(), digest),
            None => format!("{}:{}", self.context(), self.identifier()),
        }
    }

    /// The reference as the caller wrote it
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for ImageReference {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ImageReference {}

impl Hash for ImageReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Fold Docker Hub aliases into the canonical registry name.
pub fn normalize_registry(registry: &str) -> String {
    let registry = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let host = registry.split('/').next().unwrap_or(registry);
    if DOCKER_HUB_ALIASES.contains(&host) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> PackResult<(String, String)> {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (normalize_registry(first), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository
    };

    validate_repository(reference, &repository)?;
    Ok((registry, repository))
}

fn validate_repository(reference: &str, repository: &str) -> PackResult<()> {
    if repository.is_empty() {
        return Err(PackError::invalid_reference(reference, "empty repository"));
    }
    if repository.len() > 255 {
        return Err(PackError::invalid_reference(
            reference,
            "repository must be at most 255 characters",
        ));
    }

    for component in repository.split('/') {
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
        let bounded = component
            .chars()
            .next()
            .zip(component.chars().last())
            .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

        if !valid_chars || !bounded {
            return Err(PackError::invalid_reference(
                reference,
                format!(
                    "repository component '{}' must be lowercase alphanumerics separated by '.', '_' or '-'",
                    component
                ),
            ));
        }
    }
    Ok(())
}

fn validate_tag(reference: &str, tag: &str) -> PackResult<()> {
    let starts_ok = tag
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let chars_ok = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));

    if !starts_ok || !chars_ok || tag.len() > 128 {
        return Err(PackError::invalid_reference(
            reference,
            format!("invalid tag '{}'", tag),
        ));
    }
    Ok(())
}

fn validate_digest(reference: &str, digest: &str) -> PackResult<()> {
    match digest.split_once(':') {
        Some((algorithm, hex)) if !algorithm.is_empty() && hex.len() >= 32 => {
            if hex.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(())
            } else {
                Err(PackError::invalid_reference(
                    reference,
                    "digest must be hex encoded",
                ))
            }
        }
        _ => Err(PackError::invalid_reference(
            reference,
            "expected digest in algorithm:hex form",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4bcff63911fcb4448bd4fdacec207030997caf25e9bea4045fa6c8c44de311d1";

    #[test]
    fn parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry(), "index.docker.io");
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.tag(), Some("latest"));
        assert_eq!(r.name(), "index.docker.io/library/nginx:latest");
        assert_eq!(r.to_string(), "nginx");
    }

    #[test]
    fn parse_user_repo_with_tag() {
        let r = ImageReference::parse("my/repo:other-tag").unwrap();
        assert_eq!(r.repository(), "my/repo");
        assert_eq!(r.identifier(), "other-tag");
        assert_eq!(r.context(), "index.docker.io/my/repo");
    }

    #[test]
    fn parse_registry_with_port() {
        let r = ImageReference::parse("myregistryhost:5000/fedora/httpd:version1.0").unwrap();
        assert_eq!(r.registry(), "myregistryhost:5000");
        assert_eq!(r.repository(), "fedora/httpd");
        assert_eq!(r.tag(), Some("version1.0"));
    }

    #[test]
    fn parse_localhost_without_tag() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "app");
        assert_eq!(r.tag(), Some("latest"));
    }

    #[test]
    fn parse_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/image@{}", DIGEST)).unwrap();
        assert_eq!(r.registry(), "ghcr.io");
        assert_eq!(r.tag(), None);
        assert_eq!(r.digest(), Some(DIGEST));
        assert_eq!(r.identifier(), DIGEST);
        assert_eq!(r.name(), format!("ghcr.io/org/image@{}", DIGEST));
    }

    #[test]
    fn docker_hub_aliases_are_equal() {
        let short = ImageReference::parse("my/repo").unwrap();
        let explicit = ImageReference::parse("index.docker.io/my/repo:latest").unwrap();
        let alias = ImageReference::parse("docker.io/my/repo").unwrap();
        assert_eq!(short, explicit);
        assert_eq!(short, alias);
        assert_ne!(short, ImageReference::parse("my/repo:v2").unwrap());
    }

    #[test]
    fn rejects_uppercase_repository() {
        let err = ImageReference::parse("example.com/MyApp").unwrap_err();
        assert!(matches!(err, PackError::InvalidReference { .. }));
    }

    #[test]
    fn rejects_bad_tag_and_digest() {
        assert!(ImageReference::parse("app:-bad").is_err());
        assert!(ImageReference::parse("app@sha256").is_err());
        assert!(ImageReference::parse("app@sha256:xyz").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("example.com/").is_err());
    }

    #[test]
    fn normalize_registry_hosts() {
        assert_eq!(normalize_registry("docker.io"), "index.docker.io");
        assert_eq!(normalize_registry("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_registry("registry-1.docker.io"), "index.docker.io");
        assert_eq!(normalize_registry("ghcr.io"), "ghcr.io");
    }
}
