//! Build and launch caches
//!
//! A cache is a named docker volume, a registry image or a host directory.
//! Volume names are derived deterministically from the target image so
//! successive builds of the same image reuse their cache.

mod bind;
mod image;
mod options;
mod volume;

pub use bind::BindCache;
pub use image::ImageCache;
pub use options::{CacheFormat, CacheInfo, CacheOpts};
pub use volume::VolumeCache;

use crate::docker::DockerClient;
use crate::error::{PackError, PackResult};
use crate::reference::ImageReference;
use std::fmt;

/// Which storage backs a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Volume,
    Image,
    Bind,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Image => write!(f, "image"),
            Self::Bind => write!(f, "bind"),
        }
    }
}

/// Cache handle passed to phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cache {
    Volume(VolumeCache),
    Image(ImageCache),
    Bind(BindCache),
}

impl Cache {
    /// Build a cache handle for `target` from user-facing cache settings
    pub fn new(info: &CacheInfo, target: &ImageReference, suffix: &str) -> PackResult<Self> {
        match info.format {
            CacheFormat::Volume => Ok(Self::Volume(VolumeCache::new(target, info, suffix))),
            CacheFormat::Image => ImageCache::new(&info.source).map(Self::Image),
            CacheFormat::Bind => Ok(Self::Bind(BindCache::new(&info.source))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Volume(cache) => cache.name(),
            Self::Image(cache) => cache.name(),
            Self::Bind(cache) => cache.name(),
        }
    }

    pub fn kind(&self) -> CacheKind {
        match self {
            Self::Volume(_) => CacheKind::Volume,
            Self::Image(_) => CacheKind::Image,
            Self::Bind(_) => CacheKind::Bind,
        }
    }

    /// Source to mount at the cache directory; image caches are not mounted
    pub fn mount_source(&self) -> Option<&str> {
        match self {
            Self::Volume(cache) => Some(cache.name()),
            Self::Bind(cache) => Some(cache.name()),
            Self::Image(_) => None,
        }
    }

    /// Create host directories backing bind caches
    pub async fn prepare(&self) -> PackResult<()> {
        match self {
            Self::Bind(cache) => cache.prepare().await,
            _ => Ok(()),
        }
    }

    /// Remove the backing volume, local image or directory. Absent resources are not an error
    pub async fn clear(&self, docker: &dyn DockerClient) -> PackResult<()> {
        let result = match self {
            Self::Volume(cache) => docker.volume_remove(cache.name(), true).await,
            Self::Image(cache) => docker.image_remove(cache.name(), true).await,
            Self::Bind(cache) => cache.clear().await,
        };

        result.map_err(|e| PackError::CacheClear {
            name: self.name().to_string(),
            source: Box::new(e),
        })
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDocker;

    fn target() -> ImageReference {
        ImageReference::parse("example.com/app:1").unwrap()
    }

    #[test]
    fn default_info_derives_volume() {
        let cache = Cache::new(&CacheInfo::default(), &target(), "build").unwrap();
        assert_eq!(cache.kind(), CacheKind::Volume);
        assert!(cache.name().starts_with("pack-cache-"));
        assert!(cache.name().ends_with(".build"));
    }

    #[test]
    fn image_info_validates_reference() {
        let info = CacheInfo {
            format: CacheFormat::Image,
            source: "example.com/cache:build".to_string(),
        };
        let cache = Cache::new(&info, &target(), "build").unwrap();
        assert_eq!(cache.kind(), CacheKind::Image);
        assert_eq!(cache.name(), "example.com/cache:build");
        assert_eq!(cache.to_string(), "example.com/cache:build (image)");

        let bad = CacheInfo {
            format: CacheFormat::Image,
            source: "example.com/Cache".to_string(),
        };
        assert!(matches!(
            Cache::new(&bad, &target(), "build"),
            Err(PackError::InvalidCacheImage { .. })
        ));
    }

    #[tokio::test]
    async fn clear_volume_is_idempotent() {
        let cache = Cache::new(&CacheInfo::default(), &target(), "build").unwrap();
        let docker = FakeDocker::new().with_volume(cache.name());

        cache.clear(&docker).await.unwrap();
        assert!(!docker.volumes().contains(cache.name()));
        cache.clear(&docker).await.unwrap();

        let removals = docker
            .calls()
            .iter()
            .filter(|c| c.starts_with("volume-rm:"))
            .count();
        assert_eq!(removals, 2);
    }

    #[tokio::test]
    async fn clear_image_removes_local_image() {
        let info = CacheInfo {
            format: CacheFormat::Image,
            source: "example.com/cache:build".to_string(),
        };
        let cache = Cache::new(&info, &target(), "build").unwrap();
        let docker = FakeDocker::new().with_image("example.com/cache:build", "linux");

        cache.clear(&docker).await.unwrap();
        assert!(!docker.has_image("example.com/cache:build"));
        assert_eq!(docker.calls(), vec!["image-rm:example.com/cache:build"]);
    }

    #[tokio::test]
    async fn bind_cache_uses_host_path() {
        let root = tempfile::TempDir::new().unwrap();
        let dir = root.path().join("build-cache");
        let info = CacheInfo {
            format: CacheFormat::Bind,
            source: dir.to_string_lossy().into_owned(),
        };
        let cache = Cache::new(&info, &target(), "build").unwrap();
        assert_eq!(cache.kind(), CacheKind::Bind);
        assert_eq!(cache.mount_source(), Some(info.source.as_str()));

        let docker = FakeDocker::new();
        cache.prepare().await.unwrap();
        assert!(dir.is_dir());
        cache.clear(&docker).await.unwrap();
        assert!(!dir.exists());
        assert!(docker.calls().is_empty());
    }

    #[tokio::test]
    async fn clear_failure_names_cache() {
        let cache = Cache::new(&CacheInfo::default(), &target(), "build").unwrap();
        let docker = FakeDocker::new().with_failing_volume_remove();

        let err = cache.clear(&docker).await.unwrap_err();
        assert!(matches!(err, PackError::CacheClear { ref name, .. } if name == cache.name()));
    }
}
