//! Volume-backed caches

use crate::cache::CacheInfo;
use crate::names::{filter_reserved_names, sanitize_volume_component, MAX_VOLUME_NAME_LEN};
use crate::reference::ImageReference;
use sha2::{Digest, Sha256};

/// Cache stored in a named docker volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCache {
    name: String,
}

impl VolumeCache {
    /// Volume cache for `target`.
    ///
    /// An explicit name from `info` is used as-is (after reserved-name
    /// filtering). Otherwise the name is derived from the target reference
    /// and ends in `.<suffix>`.
    pub fn new(target: &ImageReference, info: &CacheInfo, suffix: &str) -> Self {
        let name = if info.source.is_empty() {
            derived_name(target, suffix)
        } else {
            filter_reserved_names(&info.source)
        };
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

const CACHE_PREFIX: &str = "pack-cache-";
const HASH_LEN: usize = 12;

/// `pack-cache-<repo_path>_<tag>-<hash>.<suffix>`
///
/// The readable part drops the registry and is cut short when the name
/// would exceed the volume-name limit; the hash covers the fully
/// qualified reference so different registries never share a volume.
fn derived_name(target: &ImageReference, suffix: &str) -> String {
    let readable = filter_reserved_names(&sanitize_volume_component(&format!(
        "{}_{}",
        target.repository().replace('/', "_"),
        target.identifier()
    )));
    let digest = hex::encode(Sha256::digest(target.name().as_bytes()));

    let budget = MAX_VOLUME_NAME_LEN
        .saturating_sub(CACHE_PREFIX.len() + HASH_LEN + suffix.len() + 2);
    let readable: String = readable.chars().take(budget).collect();

    format!("{}{}-{}.{}", CACHE_PREFIX, readable, &digest[..HASH_LEN], suffix)
}
